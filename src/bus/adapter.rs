//! The broker adapter contract.

use super::{BrokerError, Message};
use crate::health::Health;

/// One connection to one message broker.
///
/// Normalizes log-offset brokers (commit advances a consumer-group offset)
/// and ack/nack brokers (each delivery is acknowledged on its own) behind a
/// pull-based interface. Implementations must make `publish` safe to call
/// concurrently from any number of threads; `receive`, `commit` and
/// `abandon` for a topic are only ever called by that topic's dispatch loop.
///
/// Implementations might include:
/// - [`LogAdapter`](super::LogAdapter) - partitioned log with consumer groups
/// - [`QueueAdapter`](super::QueueAdapter) - managed queue with per-topic subscriptions
/// - Kafka or Google Pub/Sub network drivers implemented outside this crate
pub trait BrokerAdapter: Send + Sync {
    /// Publish `payload` under `topic`.
    ///
    /// An error means the broker is known not to have accepted the message.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Publish with headers / attributes.
    ///
    /// Default implementation drops the metadata. Backends that carry
    /// headers override it.
    fn publish_with_metadata(
        &self,
        topic: &str,
        payload: &[u8],
        _metadata: Vec<(String, String)>,
    ) -> Result<(), BrokerError> {
        self.publish(topic, payload)
    }

    /// Publish several payloads to one topic.
    ///
    /// Default implementation publishes sequentially and stops at the
    /// first failure. Implementations may override for batch optimization.
    fn publish_batch(&self, topic: &str, payloads: &[Vec<u8>]) -> Result<(), BrokerError> {
        for payload in payloads {
            self.publish(topic, payload)?;
        }
        Ok(())
    }

    /// Register interest in `topic` before its dispatch loop starts.
    ///
    /// Managed-queue backends create their subscription here so messages
    /// published after start-up are not lost. Default is a no-op.
    fn prepare(&self, _topic: &str) -> Result<(), BrokerError> {
        Ok(())
    }

    /// Wait up to `timeout_ms` for the next message on `topic`.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a message.
    fn receive(&self, topic: &str, timeout_ms: u64) -> Result<Option<Message>, BrokerError>;

    /// Mark `message` as processed so it is not redelivered.
    ///
    /// For log-offset brokers this commits the offset past the message,
    /// which implies every earlier message on the same partition.
    fn commit(&self, message: Message) -> Result<(), BrokerError>;

    /// Give up on `message` without committing it; the broker's native
    /// redelivery takes over. Default leaves it for redelivery untouched.
    fn abandon(&self, message: Message) -> Result<(), BrokerError> {
        drop(message);
        Ok(())
    }

    /// Close the connection. Blocked and later `receive` calls return
    /// [`BrokerError::Closed`].
    fn close(&self) {}

    /// Report connectivity.
    fn health(&self) -> Health;
}
