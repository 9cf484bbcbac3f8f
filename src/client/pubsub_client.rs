use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::broker::message::Response;

pub type ClientId = String;

/// The response-channel of one connection (or of the route mapper).
///
/// Clones share the same underlying queue, so the coordinator can keep one
/// clone per subscription while the connection keeps its own.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier, used to tell subscriptions apart.
    pub id: ClientId,

    /// Unbounded so that fan-out never blocks the coordinator.
    pub sender: UnboundedSender<Response>,

    pub connected_at: DateTime<Utc>,
}

impl Client {
    pub fn new(sender: UnboundedSender<Response>) -> Self {
        Self::with_prefix("client", sender)
    }

    pub fn with_prefix(prefix: &str, sender: UnboundedSender<Response>) -> Self {
        Self {
            id: format!("{prefix}-{}", Uuid::new_v4()),
            sender,
            connected_at: Utc::now(),
        }
    }

    /// Queues a response without waiting. Returns `false` once the receiving
    /// side has gone away.
    pub fn send(&self, response: Response) -> bool {
        self.sender.send(response).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Seconds since the client was created, for disconnect logs.
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.connected_at).num_seconds()
    }
}

impl PartialEq for Client {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Client {}
