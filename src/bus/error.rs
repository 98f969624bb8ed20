//! Broker error taxonomy.

use std::error::Error;

use thiserror::Error;

/// How a dispatch loop must react to a broker error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry with backoff; never surfaced to the handler.
    Transient,
    /// Ends consumption for the affected topic.
    Fatal,
    /// The adapter was closed, usually because shutdown was requested.
    Closed,
}

/// Error type for broker adapter operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A temporary broker condition (leader election, throttling, timeouts).
    #[error("transient broker error: {0}")]
    Transient(String),
    /// The connection to the broker is unusable.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The adapter has been closed.
    #[error("adapter closed")]
    Closed,
    /// The broker (or adapter-side validation) rejected a publish.
    #[error("publish rejected: {0}")]
    Rejected(String),
    /// Serialization of an outgoing payload failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    /// The commit / acknowledgement of a received message failed.
    #[error("commit failed: {0}")]
    Commit(String),
    /// Anything a concrete driver cannot classify more precisely.
    #[error("broker error: {0}")]
    Other(#[source] Box<dyn Error + Send + Sync>),
}

impl BrokerError {
    /// Classify this error for the receive path of a dispatch loop.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Transient(_) => ErrorKind::Transient,
            BrokerError::Closed => ErrorKind::Closed,
            BrokerError::Connection(_)
            | BrokerError::Rejected(_)
            | BrokerError::SerializationFailed(_)
            | BrokerError::Commit(_)
            | BrokerError::Other(_) => ErrorKind::Fatal,
        }
    }

    /// Wrap an arbitrary driver error.
    pub fn other(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        BrokerError::Other(err.into())
    }
}
