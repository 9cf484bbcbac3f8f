//! Broker engine
//!
//! The `Broker` is the coordinator: it owns the subscription [`TopicTree`] and
//! drains the shared request queue one [`Envelope`] at a time. Every routing
//! change and every publish fan-out happens inside [`Broker::handle_request`],
//! so the tree never needs a lock. Anything else talks to the broker through
//! a cloneable [`BrokerHandle`].
//!
//! Concurrency and usage notes:
//! - The request queue is bounded; `BrokerHandle::submit` waits while it is
//!   full, which is the only backpressure connections feel.
//! - Responses go onto unbounded per-client queues, so a slow subscriber
//!   never stalls the loop or other subscribers.
//! - A bad request turns into a `Nok` reply. Nothing a client sends can make
//!   the loop exit; it stops only when every handle has been dropped.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::broker::message::{Envelope, Request, Response};
use crate::broker::topic::{TopicName, TopicPattern, TopicTree};
use crate::client::{Client, ClientId};
use crate::utils::error::{BrokerError, RouteError};

/// Longest payload a delivery can carry on the wire.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

#[derive(Debug)]
pub struct Broker {
    pub tree: TopicTree,
    requests: mpsc::Receiver<Envelope>,
}

/// Submission side of the request queue.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    sender: mpsc::Sender<Envelope>,
}

impl Broker {
    /// Creates a broker whose request queue holds up to `capacity` envelopes.
    pub fn new(capacity: usize) -> (Self, BrokerHandle) {
        let (sender, requests) = mpsc::channel(capacity.max(1));
        let broker = Self {
            tree: TopicTree::new(),
            requests,
        };
        (broker, BrokerHandle { sender })
    }

    /// Runs the coordinator loop until every handle is gone, then hands the
    /// broker back so its final routing state can be inspected.
    pub async fn run(mut self) -> Self {
        info!("Broker started");
        while let Some(envelope) = self.requests.recv().await {
            self.handle_request(envelope);
        }
        info!(
            subscriptions = self.tree.len(),
            "Broker stopped, all handles dropped"
        );
        self
    }

    /// Applies one request and queues its reply, if it has one.
    pub fn handle_request(&mut self, envelope: Envelope) {
        let Envelope { reply_to, request } = envelope;
        trace!(client = %reply_to.id, kind = request.kind(), "Handling request");

        let reply = match request {
            Request::Publish { topic, payload } => match self.publish(&topic, payload) {
                Ok(delivered) => {
                    debug!("{} published to {topic} ({delivered} deliveries)", reply_to.id);
                    Some(Response::Ok)
                }
                Err(e) => Some(nok(&reply_to.id, e)),
            },
            Request::Subscribe { topic } => match self.subscribe(&topic, reply_to.clone()) {
                Ok(()) => {
                    debug!("{} subscribed to {topic}", reply_to.id);
                    Some(Response::Ok)
                }
                Err(e) => Some(nok(&reply_to.id, e)),
            },
            Request::UnsubscribeAll { skip_response } => {
                let removed = self.cleanup_client(&reply_to.id);
                debug!("{} dropped {removed} subscriptions", reply_to.id);
                (!skip_response).then_some(Response::Ok)
            }
            Request::Unsubscribe { topic } => match self.unsubscribe(&topic, &reply_to.id) {
                Ok(()) => {
                    debug!("{} unsubscribed from {topic}", reply_to.id);
                    Some(Response::Ok)
                }
                Err(e) => Some(nok(&reply_to.id, e)),
            },
            Request::Pong => None,
        };

        if let Some(response) = reply {
            if !reply_to.send(response) {
                trace!("Reply to {} dropped, receiver closed", reply_to.id);
            }
        }
    }

    pub fn subscribe(&mut self, topic: &str, client: Client) -> Result<(), RouteError> {
        let pattern = TopicPattern::parse(topic)?;
        self.tree.add(&pattern, client);
        Ok(())
    }

    pub fn unsubscribe(&mut self, topic: &str, client_id: &ClientId) -> Result<(), RouteError> {
        let pattern = TopicPattern::parse(topic)?;
        self.tree.remove(&pattern, client_id)
    }

    /// Drops every subscription of a client. Returns how many were removed.
    pub fn cleanup_client(&mut self, client_id: &ClientId) -> usize {
        self.tree.remove_all(client_id)
    }

    /// Queues a `Publish` response for every matching subscription and
    /// returns how many were queued.
    ///
    /// Subscribers whose queue turns out to be closed lose all their
    /// subscriptions once the fan-out is done.
    pub fn publish(&mut self, topic: &str, payload: Bytes) -> Result<usize, RouteError> {
        let name = TopicName::parse(topic)?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(RouteError::PayloadTooLarge { len: payload.len() });
        }

        let mut delivered = 0;
        let mut dead: Vec<ClientId> = Vec::new();
        for client in self.tree.matches(&name) {
            let response = Response::Publish {
                topic: topic.to_string(),
                payload: payload.clone(),
            };
            if client.send(response) {
                delivered += 1;
            } else {
                dead.push(client.id.clone());
            }
        }

        dead.sort();
        dead.dedup();
        for client_id in dead {
            let removed = self.tree.remove_all(&client_id);
            warn!("Pruned {removed} subscriptions of closed client {client_id}");
        }

        Ok(delivered)
    }
}

fn nok(client_id: &str, error: RouteError) -> Response {
    warn!("Request from {client_id} failed: {error}");
    Response::Nok(error.to_string())
}

impl BrokerHandle {
    /// Queues a request for the coordinator. Waits while the queue is full.
    pub async fn submit(&self, reply_to: &Client, request: Request) -> Result<(), BrokerError> {
        self.sender
            .send(Envelope {
                reply_to: reply_to.clone(),
                request,
            })
            .await
            .map_err(|_| BrokerError::Unavailable)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves once the coordinator has stopped.
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}
