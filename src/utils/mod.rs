//! The `utils` module provides shared definitions used across the `busrouter`
//! application: the error types each layer reports and the tracing setup.

pub mod error;
pub mod logging;
