//! # Strata Message Queue Errors
//!
//! [`QueueError`] is what adapter callers see. [`TransportError`] is raised by
//! broker transports and only surfaces through `QueueError::Transport` when
//! the adapter cannot absorb it (buffering and reconnecting absorb most).
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("Unsupported message queue adapter '{0}'")]
    UnsupportedAdapter(String),

    #[error("Message queue unavailable: cannot buffer message for topic '{topic}' ({pending}/{capacity} pending)")]
    QueueUnavailable {
        topic: String,
        pending: usize,
        capacity: usize,
    },

    #[error("Message queue is closed")]
    Closed,

    #[error("Invalid broker endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Broker adapter requires at least one endpoint URL")]
    NoEndpoints,

    #[error("No broker transport available for scheme '{scheme}'")]
    TransportUnavailable { scheme: String },

    #[error("Broker transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Broker endpoint {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("Connection to {endpoint} was lost")]
    ConnectionLost { endpoint: String },

    #[error("Timed out connecting to {endpoint} after {timeout_ms}ms")]
    ConnectTimeout { endpoint: String, timeout_ms: u64 },

    #[error("Broker protocol error: {0}")]
    Protocol(String),
}
