//! In-process partitioned log with consumer-group offsets.
//!
//! Behaves like a Kafka-style broker for a single process:
//! - Each topic is split into a fixed number of append-only partitions
//! - Publishes are spread across partitions round-robin
//! - Committed offsets are stored per (consumer group, topic, partition)
//! - A consumer resumes from the committed offset, so messages that were
//!   received but never committed are redelivered after a restart
//! - An abandoned message rewinds the consumer to its offset and is
//!   received again in the same session

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{lock, AckHandle, BrokerAdapter, BrokerError, Message};
use crate::config::ConfigError;
use crate::health::Health;

#[derive(Debug, Clone)]
struct Record {
    payload: Vec<u8>,
    metadata: Vec<(String, String)>,
}

#[derive(Default)]
struct LogState {
    /// topic -> partitions -> records
    topics: HashMap<String, Vec<Vec<Record>>>,
    /// (group, topic, partition) -> next offset to consume
    committed: HashMap<(String, String, u32), u64>,
    /// topic -> partition that receives the next publish
    next_partition: HashMap<String, u32>,
}

struct LogInner {
    partitions: u32,
    state: Mutex<LogState>,
    appended: Condvar,
}

/// Shared partitioned log. Cloning creates another handle to the same storage.
///
/// ## Example
///
/// ```
/// use pubsub_rust::bus::{BrokerAdapter, LogAdapter, PartitionedLog};
///
/// let log = PartitionedLog::new(1);
/// let consumer = LogAdapter::new(log.clone(), "order-service").unwrap();
///
/// consumer.publish("order-status", b"shipped").unwrap();
///
/// let msg = consumer.receive("order-status", 100).unwrap().unwrap();
/// assert_eq!(msg.payload(), b"shipped");
/// consumer.commit(msg).unwrap();
///
/// assert_eq!(log.committed_offset("order-service", "order-status", 0), Some(1));
/// ```
#[derive(Clone)]
pub struct PartitionedLog {
    inner: Arc<LogInner>,
}

impl PartitionedLog {
    /// Create a log with `partitions` partitions per topic (at least one).
    pub fn new(partitions: u32) -> Self {
        Self {
            inner: Arc::new(LogInner {
                partitions: partitions.max(1),
                state: Mutex::new(LogState::default()),
                appended: Condvar::new(),
            }),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.inner.partitions
    }

    /// Append a record and return its (partition, offset).
    pub fn append(
        &self,
        topic: &str,
        payload: Vec<u8>,
        metadata: Vec<(String, String)>,
    ) -> (u32, u64) {
        let mut state = lock(&self.inner.state);
        let partitions = self.inner.partitions;

        let next = state.next_partition.entry(topic.to_string()).or_insert(0);
        let partition = *next;
        *next = (partition + 1) % partitions;

        let log = state
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions as usize]);
        let records = &mut log[partition as usize];
        records.push(Record { payload, metadata });
        let offset = records.len() as u64 - 1;

        drop(state);
        self.inner.appended.notify_all();
        (partition, offset)
    }

    /// Total number of records in a topic across all partitions.
    pub fn len(&self, topic: &str) -> usize {
        lock(&self.inner.state)
            .topics
            .get(topic)
            .map_or(0, |parts| parts.iter().map(Vec::len).sum())
    }

    /// Check if a topic holds no records.
    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Next offset the group will consume on a partition, if it ever committed.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> Option<u64> {
        lock(&self.inner.state)
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// All payloads of a topic, partition by partition.
    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        lock(&self.inner.state)
            .topics
            .get(topic)
            .map(|parts| {
                parts
                    .iter()
                    .flatten()
                    .map(|r| r.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Read position of one (topic, partition) within a consumer session.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    next: u64,
    /// Offset seeked back to by `abandon`, with the attempt it is due for.
    retry: Option<(u64, u32)>,
}

#[derive(Default)]
struct Cursors {
    positions: HashMap<(String, u32), Cursor>,
    /// topic -> partition the next scan starts at
    rotation: HashMap<String, usize>,
}

/// Broker adapter over a [`PartitionedLog`] for one consumer group.
///
/// The in-session read position advances on every receive; only
/// [`commit`](BrokerAdapter::commit) moves the group's committed offset.
/// [`abandon`](BrokerAdapter::abandon) seeks the partition back to the
/// abandoned offset, so a failed record is received again before any later
/// offset of that partition can be committed past it.
/// A new adapter for the same group starts from the committed offsets.
pub struct LogAdapter {
    log: PartitionedLog,
    group_id: String,
    brokers: Vec<String>,
    cursors: Mutex<Cursors>,
    closed: AtomicBool,
}

impl LogAdapter {
    /// Fails fast when the consumer group id is empty.
    pub fn new(log: PartitionedLog, group_id: impl Into<String>) -> Result<Self, ConfigError> {
        let group_id = group_id.into();
        if group_id.trim().is_empty() {
            return Err(ConfigError::MissingConsumerGroup);
        }
        Ok(Self {
            log,
            group_id,
            brokers: Vec::new(),
            cursors: Mutex::new(Cursors::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Broker addresses reported by [`health`](BrokerAdapter::health).
    pub fn with_brokers(mut self, brokers: Vec<String>) -> Self {
        self.brokers = brokers;
        self
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn log(&self) -> &PartitionedLog {
        &self.log
    }

    fn next_record(&self, state: &LogState, topic: &str) -> Option<Message> {
        let partitions = state.topics.get(topic)?;
        let count = partitions.len();
        let mut cursors = lock(&self.cursors);
        let first = cursors.rotation.get(topic).copied().unwrap_or(0) % count.max(1);

        for step in 0..count {
            let index = (first + step) % count;
            let partition = index as u32;
            let key = (topic.to_string(), partition);
            let cursor = cursors.positions.entry(key).or_insert_with(|| Cursor {
                next: state
                    .committed
                    .get(&(self.group_id.clone(), topic.to_string(), partition))
                    .copied()
                    .unwrap_or(0),
                retry: None,
            });

            let position = cursor.next;
            let Some(record) = partitions[index].get(position as usize) else {
                continue;
            };
            let attempt = match cursor.retry.take() {
                Some((offset, attempt)) if offset == position => attempt,
                _ => 1,
            };
            cursor.next = position + 1;
            cursors.rotation.insert(topic.to_string(), (index + 1) % count);

            let ack = AckHandle::Offset {
                partition,
                offset: position,
            };
            return Some(
                Message::new(topic, record.payload.clone(), ack)
                    .with_metadata(record.metadata.clone())
                    .with_delivery_attempt(attempt),
            );
        }
        None
    }
}

impl BrokerAdapter for LogAdapter {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.publish_with_metadata(topic, payload, Vec::new())
    }

    fn publish_with_metadata(
        &self,
        topic: &str,
        payload: &[u8],
        metadata: Vec<(String, String)>,
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        if topic.is_empty() {
            return Err(BrokerError::Rejected("topic name must not be empty".into()));
        }
        self.log.append(topic, payload.to_vec(), metadata);
        Ok(())
    }

    fn receive(&self, topic: &str, timeout_ms: u64) -> Result<Option<Message>, BrokerError> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut state = lock(&self.log.inner.state);

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Closed);
            }
            if let Some(message) = self.next_record(&state, topic) {
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = match self.log.inner.appended.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn commit(&self, message: Message) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let AckHandle::Offset { partition, offset } = *message.ack_handle() else {
            return Err(BrokerError::Commit(format!(
                "log adapter cannot commit {:?}",
                message.ack_handle()
            )));
        };

        let mut state = lock(&self.log.inner.state);
        let key = (self.group_id.clone(), message.topic().to_string(), partition);
        let committed = state.committed.entry(key).or_insert(0);
        *committed = (*committed).max(offset + 1);
        Ok(())
    }

    fn abandon(&self, message: Message) -> Result<(), BrokerError> {
        let AckHandle::Offset { partition, offset } = *message.ack_handle() else {
            return Err(BrokerError::Commit(format!(
                "log adapter cannot abandon {:?}",
                message.ack_handle()
            )));
        };

        let mut cursors = lock(&self.cursors);
        let key = (message.topic().to_string(), partition);
        if let Some(cursor) = cursors.positions.get_mut(&key) {
            if offset < cursor.next {
                cursor.next = offset;
                cursor.retry = Some((offset, message.delivery_attempt() + 1));
            }
        }
        debug!(topic = message.topic(), partition, offset, "seeked back to abandoned offset");
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Take the lock so no receiver misses the wakeup between its check and its wait.
        drop(lock(&self.log.inner.state));
        self.log.inner.appended.notify_all();
    }

    fn health(&self) -> Health {
        let health = if self.closed.load(Ordering::Acquire) {
            Health::down("KAFKA")
        } else {
            Health::up("KAFKA")
        };
        health
            .with_detail("consumer_group", &self.group_id)
            .with_detail("partitions", self.log.partitions())
            .with_detail("brokers", self.brokers.join(","))
    }
}
