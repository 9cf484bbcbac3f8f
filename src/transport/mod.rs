//! The `transport` module connects devices to the broker.
//!
//! It defines the binary wire protocol (`codec`), the per-connection state
//! machine with its keepalive (`connection`) and the TCP accept loop
//! (`server`).

pub mod codec;
pub mod connection;
pub mod server;

pub use connection::{CloseReason, Keepalive, handle_connection};
pub use server::{serve, serve_until, start_server};

#[cfg(test)]
mod tests;
