//! Messages exchanged with the coordinator.
//!
//! Connections send an [`Envelope`] (a [`Request`] plus the [`Client`] that
//! should hear back) over the shared request queue. The coordinator answers
//! with [`Response`]s on the client's own queue, which is also where publish
//! deliveries for that client land.

use bytes::Bytes;

use crate::client::Client;

/// A command for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    /// Drops every subscription of the sender. With `skip_response` set no
    /// `Ok` is queued, which is what a closing connection wants.
    UnsubscribeAll { skip_response: bool },
    Publish { topic: String, payload: Bytes },
    /// Keepalive acknowledgement. Routed through the coordinator only to keep
    /// it ordered with the rest of the connection's traffic.
    Pong,
}

impl Request {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
            Request::UnsubscribeAll { .. } => "unsubscribe_all",
            Request::Publish { .. } => "publish",
            Request::Pong => "pong",
        }
    }
}

/// Everything that can be queued for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    /// The reason is logged but never sent; the wire only carries the byte.
    Nok(String),
    Publish { topic: String, payload: Bytes },
    Ping,
}

/// A request together with the response-channel of whoever sent it.
#[derive(Debug)]
pub struct Envelope {
    pub reply_to: Client,
    pub request: Request,
}
