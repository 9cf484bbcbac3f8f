//! Route mapper.
//!
//! At startup the mapper fetches a JSON array of `{"source", "sink"}` routes
//! over HTTP, clears its own subscriptions with `UnsubscribeAll` and then
//! subscribes to every distinct source pattern, waiting for each reply in
//! turn. Any failure restarts the whole bootstrap after a fixed backoff until
//! one attempt succeeds. There is no periodic re-sync.
//!
//! Once seeded, the mapper stays on its response channel and forwards: a
//! delivery on a topic matching a route's source is re-published to that
//! route's sink. Deliveries on a topic that is itself a sink are dropped, so
//! routes can never feed each other in a loop.
//!
//! The broker sends one delivery per matching subscription. When a topic
//! matches several distinct sources, the mapper forwards the first delivery
//! along every matching route and drops the echoes that follow.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, trace, warn};

use crate::broker::BrokerHandle;
use crate::broker::message::{Request, Response};
use crate::broker::topic::{TopicName, TopicPattern};
use crate::client::Client;
use crate::config::MapperSettings;
use crate::utils::error::{BrokerError, MapperError};


/// One entry of the mapping document. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Mapping {
    pub source: String,
    pub sink: String,
}

/// A source pattern and every sink it feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub source: TopicPattern,
    pub sinks: Vec<TopicName>,
}

/// Groups mappings by source, skipping entries that cannot be routed.
pub fn build_routes(mappings: Vec<Mapping>) -> Vec<Route> {
    let mut routes: Vec<Route> = Vec::new();
    for Mapping { source, sink } in mappings {
        let source = match TopicPattern::parse(&source) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("Skipping route from '{source}': {e}");
                continue;
            }
        };
        let sink = match TopicName::parse(&sink) {
            Ok(name) => name,
            Err(e) => {
                warn!("Skipping route from {source} to '{sink}': {e}");
                continue;
            }
        };

        match routes.iter_mut().find(|route| route.source == source) {
            Some(route) if !route.sinks.contains(&sink) => route.sinks.push(sink),
            Some(_) => {}
            None => routes.push(Route {
                source,
                sinks: vec![sink],
            }),
        }
    }
    routes
}

pub struct Mapper {
    client: Client,
    responses: UnboundedReceiver<Response>,
    broker: BrokerHandle,
    http: reqwest::Client,
    settings: MapperSettings,
    routes: Vec<Route>,
    sinks: HashSet<String>,
    // deliveries that arrived while waiting for a bootstrap reply
    pending: VecDeque<(String, Bytes)>,
    echoes: HashMap<String, usize>,
}

impl Mapper {
    pub fn new(broker: BrokerHandle, settings: MapperSettings) -> Result<Self, MapperError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self::with_client(broker, settings, http))
    }

    /// Uses a caller-built HTTP client; `request_timeout_secs` is then up to
    /// the caller.
    pub fn with_client(broker: BrokerHandle, settings: MapperSettings, http: reqwest::Client) -> Self {
        let (tx, responses) = mpsc::unbounded_channel();

        Self {
            client: Client::with_prefix("mapper", tx),
            responses,
            broker,
            http,
            settings,
            routes: Vec::new(),
            sinks: HashSet::new(),
            pending: VecDeque::new(),
            echoes: HashMap::new(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client.id
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Repeats [`Mapper::setup`] until it succeeds. Gives up only when the
    /// broker is gone.
    pub async fn bootstrap(&mut self) -> Result<usize, BrokerError> {
        let backoff = Duration::from_millis(self.settings.retry_backoff_ms);
        loop {
            match self.setup().await {
                Ok(routes) => {
                    info!(routes, "Route mapping loaded from {}", self.settings.setup_url);
                    return Ok(routes);
                }
                Err(MapperError::Broker(e)) => return Err(e),
                Err(e) => {
                    warn!("Failed to get mapping, will retry: {e}");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One bootstrap attempt. Returns how many source patterns were
    /// subscribed.
    pub async fn setup(&mut self) -> Result<usize, MapperError> {
        let mappings = self.fetch_mappings().await?;

        let reply = self
            .request(Request::UnsubscribeAll {
                skip_response: false,
            })
            .await?;
        if reply != Response::Ok {
            return Err(MapperError::ResetRejected);
        }
        self.routes.clear();
        self.sinks.clear();
        self.echoes.clear();

        for route in build_routes(mappings) {
            let topic = route.source.as_str().to_string();
            match self.request(Request::Subscribe { topic }).await? {
                Response::Ok => self.routes.push(route),
                other => warn!("Subscribing to {} failed: {other:?}", route.source),
            }
        }
        self.sinks = self
            .routes
            .iter()
            .flat_map(|route| route.sinks.iter().map(|sink| sink.as_str().to_string()))
            .collect();

        Ok(self.routes.len())
    }

    async fn fetch_mappings(&self) -> Result<Vec<Mapping>, MapperError> {
        let response = self.http.get(&self.settings.setup_url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(MapperError::Status(response.status().as_u16()));
        }
        Ok(response.json::<Vec<Mapping>>().await?)
    }

    /// Submits a request and waits for its reply, setting aside deliveries
    /// that arrive in between.
    async fn request(&mut self, request: Request) -> Result<Response, MapperError> {
        self.broker.submit(&self.client, request).await?;
        loop {
            match self.next_response().await? {
                Response::Publish { topic, payload } => self.pending.push_back((topic, payload)),
                reply => return Ok(reply),
            }
        }
    }

    async fn next_response(&mut self) -> Result<Response, BrokerError> {
        tokio::select! {
            response = self.responses.recv() => response.ok_or(BrokerError::Unavailable),
            () = self.broker.closed() => Err(BrokerError::Unavailable),
        }
    }

    /// Forwards deliveries until the broker stops.
    pub async fn forward(&mut self) {
        while let Some((topic, payload)) = self.pending.pop_front() {
            if self.forward_one(topic, payload).await.is_err() {
                return;
            }
        }

        loop {
            let result = match self.next_response().await {
                Ok(Response::Publish { topic, payload }) => self.forward_one(topic, payload).await,
                Ok(Response::Nok(reason)) => {
                    warn!("Forwarded publish rejected: {reason}");
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            if result.is_err() {
                debug!("Broker stopped, mapper exiting");
                return;
            }
        }
    }

    async fn forward_one(&mut self, topic: String, payload: Bytes) -> Result<(), BrokerError> {
        if self.sinks.contains(&topic) {
            trace!("Not forwarding {topic}, it is a sink");
            return Ok(());
        }
        if let Some(left) = self.echoes.get_mut(&topic) {
            *left -= 1;
            if *left == 0 {
                self.echoes.remove(&topic);
            }
            return Ok(());
        }

        let Ok(name) = TopicName::parse(&topic) else {
            return Ok(());
        };
        let matching: Vec<&Route> = self
            .routes
            .iter()
            .filter(|route| route.source.matches(&name))
            .collect();
        if matching.len() > 1 {
            self.echoes.insert(topic.clone(), matching.len() - 1);
        }

        let sinks: BTreeSet<&str> = matching
            .iter()
            .flat_map(|route| route.sinks.iter().map(TopicName::as_str))
            .collect();
        let sinks: Vec<String> = sinks.into_iter().map(str::to_string).collect();
        for sink in sinks {
            debug!("Forwarding {topic} to {sink}");
            let request = Request::Publish {
                topic: sink,
                payload: payload.clone(),
            };
            self.broker.submit(&self.client, request).await?;
        }
        Ok(())
    }
}

/// Bootstraps the routes, then forwards deliveries until the broker stops.
pub async fn run(broker: BrokerHandle, settings: MapperSettings) -> Result<(), MapperError> {
    let mut mapper = Mapper::new(broker, settings)?;
    mapper.bootstrap().await?;
    mapper.forward().await;
    Ok(())
}
