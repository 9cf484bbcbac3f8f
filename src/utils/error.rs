//! Error types shared across `busrouter`.
//!
//! Each layer gets its own enum so callers can tell a routing failure, which
//! is answered with a `Nok`, from a protocol failure, which ends the
//! connection.

use thiserror::Error;

/// A topic or subscription pattern failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,

    #[error("'#' must be the last segment, found at segment {position}")]
    MisplacedMultiLevel { position: usize },

    #[error("wildcard mixed into segment '{segment}'")]
    MixedWildcard { segment: String },

    #[error("publish topic '{topic}' contains a wildcard")]
    WildcardInPublish { topic: String },

    #[error("topic is not ASCII")]
    NotAscii,

    #[error("topic of {len} bytes exceeds 255 bytes")]
    TooLong { len: usize },
}

/// Failures of a routing operation on the subscription trie.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("not subscribed to '{pattern}'")]
    NotSubscribed { pattern: String },

    #[error("payload of {len} bytes exceeds 255 bytes")]
    PayloadTooLarge { len: usize },

    #[error(transparent)]
    InvalidTopic(#[from] TopicError),
}

/// Errors raised while framing the device wire protocol.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unknown command byte 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("stream ended inside a frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    #[error("field of {len} bytes exceeds the 255 byte length prefix")]
    FieldTooLong { len: usize },

    #[error("topic is not ASCII")]
    NonAsciiTopic,

    #[error("{0} has no wire encoding")]
    NotOnWire(&'static str),

    #[error("connection i/o: {0}")]
    Io(#[from] std::io::Error),
}

/// The coordinator can no longer accept requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker request channel is closed")]
    Unavailable,
}

/// Failures of one bootstrap attempt of the route mapper.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("mapping request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mapping endpoint answered with status {0}")]
    Status(u16),

    #[error("broker rejected the route reset")]
    ResetRejected,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}
