//! # Busrouter
//!
//! `busrouter` is a small in-memory publish/subscribe router for embedded
//! devices. Devices speak a compact binary protocol over TCP, subscribe to
//! `/`-separated topic patterns with `+` and `#` wildcards, and publish short
//! payloads that the router fans out to every matching subscriber.
//!
//! ## Core Modules
//!
//! - `broker`: the coordinator task, its request/response messages and the
//!   subscription trie.
//! - `client`: the identity of a response channel.
//! - `config`: loads settings from `config/default.*` and `BUSROUTER_*`
//!   environment variables.
//! - `mapper`: seeds static routes from an HTTP mapping document and
//!   forwards deliveries along them.
//! - `transport`: wire codec, per-connection keepalive and the TCP listener.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod mapper;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
