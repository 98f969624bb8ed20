//! Publish facade shared by handlers and request-serving code.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::{BrokerAdapter, BrokerError};

/// Cheap, cloneable handle for publishing to any topic.
///
/// Wraps the application's active [`BrokerAdapter`]. The topic is a call
/// parameter, so one publisher serves every topic. Safe to use from any
/// number of threads at once; synchronization is the adapter's concern.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use pubsub_rust::bus::{LogAdapter, PartitionedLog, Publisher};
///
/// let adapter = LogAdapter::new(PartitionedLog::new(1), "order-service").unwrap();
/// let publisher = Publisher::new(Arc::new(adapter));
///
/// publisher.publish("order-logs", br#"{"orderId":"1"}"#).unwrap();
/// ```
#[derive(Clone)]
pub struct Publisher {
    adapter: Arc<dyn BrokerAdapter>,
}

impl Publisher {
    pub fn new(adapter: Arc<dyn BrokerAdapter>) -> Self {
        Self { adapter }
    }

    /// Publish raw bytes to `topic`.
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> Result<(), BrokerError> {
        let payload = payload.as_ref();
        self.adapter.publish(topic, payload)?;
        debug!(topic, bytes = payload.len(), "published message");
        Ok(())
    }

    /// Publish with headers / attributes.
    pub fn publish_with_metadata(
        &self,
        topic: &str,
        payload: impl AsRef<[u8]>,
        metadata: Vec<(String, String)>,
    ) -> Result<(), BrokerError> {
        self.adapter
            .publish_with_metadata(topic, payload.as_ref(), metadata)
    }

    /// Serialize `value` as JSON and publish it.
    pub fn publish_json<T: Serialize>(&self, topic: &str, value: &T) -> Result<(), BrokerError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| BrokerError::SerializationFailed(e.to_string()))?;
        self.publish(topic, bytes)
    }

    /// Serialize `value` with bitcode and publish it.
    pub fn publish_encoded<T: Serialize>(&self, topic: &str, value: &T) -> Result<(), BrokerError> {
        let bytes =
            bitcode::serialize(value).map_err(|e| BrokerError::SerializationFailed(e.to_string()))?;
        self.publish(topic, bytes)
    }

    /// Publish several payloads to one topic.
    pub fn publish_batch(&self, topic: &str, payloads: &[Vec<u8>]) -> Result<(), BrokerError> {
        self.adapter.publish_batch(topic, payloads)
    }

    /// Get a reference to the underlying adapter.
    pub fn adapter(&self) -> &Arc<dyn BrokerAdapter> {
        &self.adapter
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("backend", &self.adapter.health().backend)
            .finish()
    }
}
