//! Error types for subscription handlers, the registry and the coordinator.

use std::error::Error;
use std::io;

use thiserror::Error;

use crate::bus::BrokerError;

/// Error type returned by subscription handlers.
///
/// Any error means "do not commit": the message is left for the broker to
/// redeliver. A handler that wants to skip a message returns `Ok(())`.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload decode / deserialization failed.
    #[error("decode failed: {0}")]
    DecodeFailed(String),
    /// Business logic rejected the message.
    #[error("rejected: {0}")]
    Rejected(String),
    /// A publish from inside the handler failed.
    #[error("publish failed: {0}")]
    Publish(#[from] BrokerError),
    /// The handler observed shutdown and gave up.
    #[error("cancelled by shutdown")]
    Cancelled,
    /// The handler panicked; the panic was caught at the loop boundary.
    #[error("handler panicked: {0}")]
    Panicked(String),
    /// Other error.
    #[error("handler error: {0}")]
    Other(#[source] Box<dyn Error + Send + Sync>),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl From<bitcode::Error> for HandlerError {
    fn from(err: bitcode::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}

impl HandlerError {
    /// Wrap an arbitrary application error.
    pub fn other(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        HandlerError::Other(err.into())
    }
}

/// Error returned when registering a handler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("topic {0:?} already has a handler")]
    Duplicate(String),
    #[error("cannot subscribe to {0:?}: dispatch loops already started")]
    Frozen(String),
    #[error("topic name must not be empty")]
    EmptyTopic,
}

/// Error returned when starting dispatch loops.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("dispatch loops already started")]
    AlreadyStarted,
    #[error("failed to prepare topic {topic:?}: {source}")]
    Prepare {
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[from] io::Error),
}
