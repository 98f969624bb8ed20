//! Messages handed from a broker adapter to a dispatch loop.

use std::time::SystemTime;

/// Opaque broker-specific token used only to commit a received message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AckHandle {
    /// Position of the message in a partitioned log.
    Offset { partition: u32, offset: u64 },
    /// Acknowledgement id issued by a managed queue for one delivery.
    AckId(String),
}

/// A message received from a broker.
///
/// Immutable once received. Adapters consume it by value in
/// [`commit`](super::BrokerAdapter::commit) or
/// [`abandon`](super::BrokerAdapter::abandon), so each ack handle is
/// settled at most once.
#[derive(Debug)]
pub struct Message {
    topic: String,
    payload: Vec<u8>,
    metadata: Option<Vec<(String, String)>>,
    ack: AckHandle,
    received_at: SystemTime,
    delivery_attempt: u32,
}

impl Message {
    /// Create a message as delivered by a broker (first delivery, received now).
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, ack: AckHandle) -> Self {
        Self {
            topic: topic.into(),
            payload,
            metadata: None,
            ack,
            received_at: SystemTime::now(),
            delivery_attempt: 1,
        }
    }

    /// Attach broker headers / attributes.
    pub fn with_metadata(mut self, metadata: Vec<(String, String)>) -> Self {
        if !metadata.is_empty() {
            self.metadata = Some(metadata);
        }
        self
    }

    /// Record how many times the broker has delivered this message.
    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = attempt.max(1);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload as a string (if valid UTF-8).
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Decode the payload from bitcode binary format.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, bitcode::Error> {
        bitcode::deserialize(&self.payload)
    }

    pub fn ack_handle(&self) -> &AckHandle {
        &self.ack
    }

    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// 1 for the first delivery, incremented on each redelivery where the
    /// backend tracks it.
    pub fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }

    /// Look up a header by key.
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All headers in arrival order.
    pub fn headers(&self) -> &[(String, String)] {
        self.metadata.as_deref().unwrap_or(&[])
    }
}
