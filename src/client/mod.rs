//! The `client` module defines the identity of a response-channel.
//!
//! A `Client` is what the coordinator stores in its subscription trie: a
//! unique id plus the sending half of the per-connection response queue.

pub mod pubsub_client;
pub use pubsub_client::{Client, ClientId};
