//! Context passed to subscription handlers.
//!
//! One context is built per received message and dropped when the handler
//! returns. It carries the message, the application's publisher and the
//! shutdown cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::error::HandlerError;
use crate::bus::{BrokerError, Message, Publisher};

/// Cooperative cancellation flag set when shutdown begins.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Payload binding shared by anything that carries a JSON body.
pub trait Bind {
    fn payload(&self) -> &[u8];

    /// Deserialize the JSON payload into a typed struct.
    fn bind<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_slice(self.payload()).map_err(HandlerError::from)
    }
}

impl Bind for Message {
    fn payload(&self) -> &[u8] {
        Message::payload(self)
    }
}

/// The context passed to every subscription handler.
///
/// ## Example
///
/// ```ignore
/// fn on_order_status(ctx: &ExecutionContext<'_>) -> Result<(), HandlerError> {
///     let Ok(status) = ctx.bind::<OrderStatus>() else {
///         // Unparseable: skip instead of redelivering forever.
///         return Ok(());
///     };
///     ctx.publish("order-logs", format!("{} is {}", status.order_id, status.status))?;
///     Ok(())
/// }
/// ```
pub struct ExecutionContext<'a> {
    message: &'a Message,
    publisher: &'a Publisher,
    cancellation: &'a Cancellation,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(
        message: &'a Message,
        publisher: &'a Publisher,
        cancellation: &'a Cancellation,
    ) -> Self {
        Self {
            message,
            publisher,
            cancellation,
        }
    }

    /// Get the topic the message arrived on.
    pub fn topic(&self) -> &str {
        self.message.topic()
    }

    /// Get the received message.
    pub fn message(&self) -> &Message {
        self.message
    }

    /// Get a header / attribute of the message.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.message.metadata(key)
    }

    /// How many times the broker has delivered this message.
    pub fn delivery_attempt(&self) -> u32 {
        self.message.delivery_attempt()
    }

    /// Get the publish capability.
    pub fn publisher(&self) -> &Publisher {
        self.publisher
    }

    /// Publish to any topic.
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> Result<(), BrokerError> {
        self.publisher.publish(topic, payload)
    }

    /// Check if shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Return `Cancelled` once shutdown has been requested.
    pub fn check_cancelled(&self) -> Result<(), HandlerError> {
        if self.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Bind for ExecutionContext<'_> {
    fn payload(&self) -> &[u8] {
        self.message.payload()
    }
}
