//! The `broker` module is the routing core: topic parsing and the
//! subscription trie (`topic`), the request/response vocabulary (`message`)
//! and the coordinator loop that owns the trie (`engine`).

pub mod engine;
pub mod message;
pub mod topic;

pub use engine::{Broker, BrokerHandle};
