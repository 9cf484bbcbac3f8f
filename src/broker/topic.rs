//! Topic parsing and the subscription trie.
//!
//! Topics are `/`-separated segments. Subscription patterns may use `+` for
//! exactly one segment and `#` for zero or more trailing segments (last
//! position only). Publish topics are literal.
//!
//! [`TopicTree`] stores subscriptions in a trie keyed by segment. Each node
//! keeps the clients whose pattern ends at that node, the clients whose
//! pattern ends with `#` right below it, a map of literal children and an
//! optional `+` child. Inserting creates nodes on the way down; lookups never
//! do. Removing prunes every node left without subscribers or children.
//!
//! Concurrency note: the tree has no interior locking. The coordinator owns
//! it and is the only code that touches it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::client::{Client, ClientId};
use crate::utils::error::{RouteError, TopicError};

pub const SEPARATOR: char = '/';
pub const SINGLE_LEVEL: &str = "+";
pub const MULTI_LEVEL: &str = "#";

/// Longest topic that still fits the one byte length prefix on the wire.
pub const MAX_TOPIC_LEN: usize = u8::MAX as usize;

/// One parsed segment of a subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    SingleLevel,
    MultiLevel,
}

/// A validated subscription pattern such as `site/+/temp` or `site/#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        check_raw(raw)?;

        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (position, part) in parts.into_iter().enumerate() {
            let segment = match part {
                SINGLE_LEVEL => Segment::SingleLevel,
                MULTI_LEVEL if position == last => Segment::MultiLevel,
                MULTI_LEVEL => return Err(TopicError::MisplacedMultiLevel { position }),
                _ if has_wildcard(part) => {
                    return Err(TopicError::MixedWildcard {
                        segment: part.to_string(),
                    });
                }
                _ => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Evaluates this single pattern against a topic, without a tree.
    pub fn matches(&self, topic: &TopicName) -> bool {
        matches_segments(&self.segments, topic.segments())
    }
}

fn matches_segments(pattern: &[Segment], topic: &[String]) -> bool {
    match (pattern, topic) {
        ([Segment::MultiLevel], _) => true,
        ([], []) => true,
        ([Segment::SingleLevel, pattern_rest @ ..], [_, topic_rest @ ..]) => {
            matches_segments(pattern_rest, topic_rest)
        }
        ([Segment::Literal(literal), pattern_rest @ ..], [segment, topic_rest @ ..])
            if literal == segment =>
        {
            matches_segments(pattern_rest, topic_rest)
        }
        _ => false,
    }
}

impl FromStr for TopicPattern {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A validated publish topic: literal segments only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    raw: String,
    segments: Vec<String>,
}

impl TopicName {
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        check_raw(raw)?;
        if has_wildcard(raw) {
            return Err(TopicError::WildcardInPublish {
                topic: raw.to_string(),
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            segments: raw.split(SEPARATOR).map(str::to_string).collect(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl FromStr for TopicName {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn check_raw(raw: &str) -> Result<(), TopicError> {
    if raw.is_empty() {
        return Err(TopicError::Empty);
    }
    if raw.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong { len: raw.len() });
    }
    if !raw.is_ascii() {
        return Err(TopicError::NotAscii);
    }
    Ok(())
}

fn has_wildcard(s: &str) -> bool {
    s.contains(['+', '#'])
}

#[derive(Debug, Default)]
struct TopicNode {
    /// Clients whose pattern ends exactly at this node.
    subscribers: Vec<Client>,
    /// Clients whose pattern continues with a trailing `#` below this node.
    multi_level: Vec<Client>,
    literal: HashMap<String, TopicNode>,
    single_level: Option<Box<TopicNode>>,
}

impl TopicNode {
    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
            && self.multi_level.is_empty()
            && self.literal.is_empty()
            && self.single_level.is_none()
    }

    /// Walks `segments`, creating missing nodes, and returns the subscriber
    /// list the pattern terminates in.
    fn subscribers_mut(&mut self, segments: &[Segment]) -> &mut Vec<Client> {
        let mut node = self;
        for segment in segments {
            match segment {
                Segment::Literal(s) => node = node.literal.entry(s.clone()).or_default(),
                Segment::SingleLevel => {
                    node = node.single_level.get_or_insert_with(Default::default)
                }
                // '#' is always last
                Segment::MultiLevel => return &mut node.multi_level,
            }
        }
        &mut node.subscribers
    }

    /// Removes one subscription of `client_id` at `segments`. Children left
    /// empty are dropped on the way back up. Returns whether anything was
    /// removed.
    fn remove(&mut self, segments: &[Segment], client_id: &str) -> bool {
        match segments {
            [] => remove_one(&mut self.subscribers, client_id),
            [Segment::MultiLevel, ..] => remove_one(&mut self.multi_level, client_id),
            [Segment::Literal(s), rest @ ..] => {
                let Some(child) = self.literal.get_mut(s) else {
                    return false;
                };
                let removed = child.remove(rest, client_id);
                if child.is_empty() {
                    self.literal.remove(s);
                }
                removed
            }
            [Segment::SingleLevel, rest @ ..] => {
                let Some(child) = self.single_level.as_mut() else {
                    return false;
                };
                let removed = child.remove(rest, client_id);
                if child.is_empty() {
                    self.single_level = None;
                }
                removed
            }
        }
    }

    fn collect<'a>(&'a self, topic: &[String], out: &mut Vec<&'a Client>) {
        match topic {
            [] => {
                out.extend(&self.subscribers);
                // '#' also matches zero trailing segments
                out.extend(&self.multi_level);
            }
            [segment, rest @ ..] => {
                if let Some(child) = self.literal.get(segment) {
                    child.collect(rest, out);
                }
                if let Some(child) = &self.single_level {
                    child.collect(rest, out);
                }
                out.extend(&self.multi_level);
            }
        }
    }

    fn count(&self) -> usize {
        1 + self.literal.values().map(TopicNode::count).sum::<usize>()
            + self.single_level.as_ref().map_or(0, |child| child.count())
    }
}

fn remove_one(clients: &mut Vec<Client>, client_id: &str) -> bool {
    match clients.iter().position(|c| c.id == client_id) {
        Some(index) => {
            clients.remove(index);
            true
        }
        None => false,
    }
}

/// The subscription registry.
///
/// Subscriptions are indexed both ways: the trie maps patterns to clients,
/// and `by_client` maps each client to the patterns it holds, so dropping a
/// disconnected client only visits the paths it actually subscribed to.
///
/// Subscribing twice to the same pattern stores two entries and yields two
/// deliveries per matching publish.
#[derive(Debug, Default)]
pub struct TopicTree {
    root: TopicNode,
    by_client: HashMap<ClientId, Vec<TopicPattern>>,
}

impl TopicTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pattern: &TopicPattern, client: Client) {
        self.by_client
            .entry(client.id.clone())
            .or_default()
            .push(pattern.clone());
        self.root.subscribers_mut(pattern.segments()).push(client);
    }

    /// Removes one subscription of `client_id` on exactly `pattern`.
    ///
    /// Fails with [`RouteError::NotSubscribed`] and leaves the tree untouched
    /// if the client does not hold that pattern.
    pub fn remove(&mut self, pattern: &TopicPattern, client_id: &str) -> Result<(), RouteError> {
        let not_subscribed = || RouteError::NotSubscribed {
            pattern: pattern.to_string(),
        };

        let patterns = self.by_client.get_mut(client_id).ok_or_else(not_subscribed)?;
        let index = patterns
            .iter()
            .position(|held| held == pattern)
            .ok_or_else(not_subscribed)?;

        if !self.root.remove(pattern.segments(), client_id) {
            return Err(not_subscribed());
        }

        patterns.remove(index);
        if patterns.is_empty() {
            self.by_client.remove(client_id);
        }
        Ok(())
    }

    /// Removes every subscription of `client_id`, returning how many there
    /// were. Unknown clients are a no-op.
    pub fn remove_all(&mut self, client_id: &str) -> usize {
        let Some(patterns) = self.by_client.remove(client_id) else {
            return 0;
        };
        patterns
            .iter()
            .filter(|pattern| self.root.remove(pattern.segments(), client_id))
            .count()
    }

    /// Every client with a pattern matching `topic`, once per matching
    /// subscription. Order across clients is unspecified.
    pub fn matches(&self, topic: &TopicName) -> Vec<&Client> {
        let mut found = Vec::new();
        self.root.collect(topic.segments(), &mut found);
        found
    }

    pub fn patterns_of(&self, client_id: &str) -> &[TopicPattern] {
        self.by_client.get(client_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of subscriptions.
    pub fn len(&self) -> usize {
        self.by_client.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }

    pub fn client_count(&self) -> usize {
        self.by_client.len()
    }

    /// Number of trie nodes, root included.
    pub fn node_count(&self) -> usize {
        self.root.count()
    }
}
