//! Broker abstraction - one contract for log-offset and ack/nack brokers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Publisher (per application)                 │
//! │  - publish(topic, payload) from handlers or request code    │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    BrokerAdapter trait                      │
//! │  publish / prepare / receive / commit / abandon / close     │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌─────────────┐    ┌──────────────┐    ┌─────────────────────┐
//! │ LogAdapter  │    │ QueueAdapter │    │ Network drivers     │
//! │ (offsets)   │    │ (ack ids)    │    │    (external)       │
//! └─────────────┘    └──────────────┘    └─────────────────────┘
//! ```
//!
//! Dispatch loops (see [`crate::subscriber`]) are the only callers of
//! `receive`, `commit` and `abandon`.

mod adapter;
mod error;
mod log;
mod message;
mod publisher;
mod queue;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

pub use adapter::BrokerAdapter;
pub use error::{BrokerError, ErrorKind};
pub use log::{LogAdapter, PartitionedLog};
pub use message::{AckHandle, Message};
pub use publisher::Publisher;
pub use queue::{subscription_id, ManagedQueue, QueueAdapter};

use crate::config::{Backend, ConfigError, PubSubConfig};

/// Build the adapter selected by `config`.
///
/// Validates first, so a bad configuration fails before any loop starts.
/// Both backends are served by the in-process brokers of this module; the
/// broker addresses and project id only show up in the adapter's health details.
pub fn connect(config: &PubSubConfig) -> Result<Arc<dyn BrokerAdapter>, ConfigError> {
    config.validate()?;

    let adapter: Arc<dyn BrokerAdapter> = match config.backend {
        Backend::Kafka => {
            let group = config
                .consumer_group
                .clone()
                .ok_or(ConfigError::MissingConsumerGroup)?;
            Arc::new(
                LogAdapter::new(PartitionedLog::new(config.partitions), group)?
                    .with_brokers(config.brokers.clone()),
            )
        }
        Backend::Google => {
            let project = config
                .project_id
                .clone()
                .ok_or(ConfigError::MissingProjectId)?;
            let name = config
                .subscription_name
                .clone()
                .ok_or(ConfigError::EmptySubscriptionName)?;
            Arc::new(QueueAdapter::new(
                ManagedQueue::new(config.ack_deadline()),
                project,
                name,
            )?)
        }
    };

    info!(backend = %config.backend, "broker adapter connected");
    Ok(adapter)
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
