//! In-process managed queue with per-subscription acknowledgements.
//!
//! Behaves like a Google Pub/Sub style broker for a single process. Each
//! subscription gets its own copy of every message published to its topic
//! after the subscription was created. Delivered messages stay outstanding
//! until they are acked; a nack or an expired ack deadline puts them back
//! at the front of the subscription so they are redelivered.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

use super::{lock, AckHandle, BrokerAdapter, BrokerError, Message};
use crate::config::ConfigError;
use crate::health::Health;

/// Subscription id for a topic and a logical subscriber name.
///
/// ```
/// assert_eq!(
///     pubsub_rust::bus::subscription_id("order-status", "order-consumer"),
///     "order-status-order-consumer"
/// );
/// ```
pub fn subscription_id(topic: &str, subscription_name: &str) -> String {
    format!("{topic}-{subscription_name}")
}

#[derive(Debug, Clone)]
struct QueuedRecord {
    seq: u64,
    payload: Vec<u8>,
    metadata: Vec<(String, String)>,
    attempts: u32,
}

struct Outstanding {
    record: QueuedRecord,
    deadline: Instant,
}

struct Subscription {
    topic: String,
    pending: VecDeque<QueuedRecord>,
    outstanding: HashMap<String, Outstanding>,
}

impl Subscription {
    /// Move every outstanding delivery past its deadline back to the front.
    fn requeue_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, o)| o.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut records: Vec<QueuedRecord> = expired
            .iter()
            .filter_map(|id| self.outstanding.remove(id))
            .map(|o| o.record)
            .collect();
        records.sort_by_key(|r| std::cmp::Reverse(r.seq));
        for record in records {
            self.pending.push_front(record);
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.outstanding.values().map(|o| o.deadline).min()
    }
}

#[derive(Default)]
struct QueueState {
    subscriptions: HashMap<String, Subscription>,
    next_seq: u64,
    next_delivery: u64,
}

struct QueueInner {
    ack_deadline: Duration,
    state: Mutex<QueueState>,
    ready: Condvar,
}

/// Shared managed queue. Cloning creates another handle to the same broker.
#[derive(Clone)]
pub struct ManagedQueue {
    inner: Arc<QueueInner>,
}

impl ManagedQueue {
    /// Unacknowledged deliveries are redelivered after `ack_deadline`.
    pub fn new(ack_deadline: Duration) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                ack_deadline,
                state: Mutex::new(QueueState::default()),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn ack_deadline(&self) -> Duration {
        self.inner.ack_deadline
    }

    /// Create `subscription` on `topic`. Existing subscriptions are kept as is.
    pub fn create_subscription(&self, subscription: &str, topic: &str) {
        lock(&self.inner.state)
            .subscriptions
            .entry(subscription.to_string())
            .or_insert_with(|| Subscription {
                topic: topic.to_string(),
                pending: VecDeque::new(),
                outstanding: HashMap::new(),
            });
    }

    pub fn has_subscription(&self, subscription: &str) -> bool {
        lock(&self.inner.state)
            .subscriptions
            .contains_key(subscription)
    }

    /// Fan a message out to every subscription on `topic`.
    ///
    /// Returns how many subscriptions received a copy. Messages published
    /// to a topic without subscriptions are dropped.
    pub fn publish(&self, topic: &str, payload: Vec<u8>, metadata: Vec<(String, String)>) -> usize {
        let mut state = lock(&self.inner.state);
        let seq = state.next_seq;
        state.next_seq += 1;

        let mut delivered = 0;
        for sub in state.subscriptions.values_mut().filter(|s| s.topic == topic) {
            sub.pending.push_back(QueuedRecord {
                seq,
                payload: payload.clone(),
                metadata: metadata.clone(),
                attempts: 0,
            });
            delivered += 1;
        }

        drop(state);
        if delivered > 0 {
            self.inner.ready.notify_all();
        }
        delivered
    }

    /// Messages waiting to be delivered on a subscription.
    pub fn pending(&self, subscription: &str) -> usize {
        lock(&self.inner.state)
            .subscriptions
            .get(subscription)
            .map_or(0, |s| s.pending.len())
    }

    /// Messages delivered but not yet acked or nacked.
    pub fn outstanding(&self, subscription: &str) -> usize {
        lock(&self.inner.state)
            .subscriptions
            .get(subscription)
            .map_or(0, |s| s.outstanding.len())
    }

    /// Acknowledge a delivery. False if the ack id is unknown or expired.
    pub fn ack(&self, subscription: &str, ack_id: &str) -> bool {
        let mut state = lock(&self.inner.state);
        let Some(sub) = state.subscriptions.get_mut(subscription) else {
            return false;
        };
        sub.requeue_expired(Instant::now());
        sub.outstanding.remove(ack_id).is_some()
    }

    /// Return a delivery for immediate redelivery.
    pub fn nack(&self, subscription: &str, ack_id: &str) -> bool {
        let mut state = lock(&self.inner.state);
        let Some(sub) = state.subscriptions.get_mut(subscription) else {
            return false;
        };
        sub.requeue_expired(Instant::now());
        let Some(outstanding) = sub.outstanding.remove(ack_id) else {
            return false;
        };
        sub.pending.push_front(outstanding.record);

        drop(state);
        self.inner.ready.notify_all();
        true
    }

    fn take_next(&self, state: &mut QueueState, subscription: &str) -> Option<(String, QueuedRecord)> {
        let delivery = state.next_delivery;
        let deadline = Instant::now() + self.inner.ack_deadline;

        let sub = state.subscriptions.get_mut(subscription)?;
        sub.requeue_expired(Instant::now());
        let mut record = sub.pending.pop_front()?;
        record.attempts += 1;

        let ack_id = URL_SAFE_NO_PAD.encode(format!("{subscription}:{}:{delivery}", record.seq));
        sub.outstanding.insert(
            ack_id.clone(),
            Outstanding {
                record: record.clone(),
                deadline,
            },
        );
        state.next_delivery += 1;
        Some((ack_id, record))
    }

    fn wake_all(&self) {
        drop(lock(&self.inner.state));
        self.inner.ready.notify_all();
    }
}

/// Broker adapter over a [`ManagedQueue`] for one logical subscriber.
///
/// Each subscribed topic maps to the subscription
/// [`subscription_id`]`(topic, subscription_name)`, created when the
/// topic's dispatch loop is prepared.
pub struct QueueAdapter {
    queue: ManagedQueue,
    project_id: String,
    subscription_name: String,
    closed: AtomicBool,
}

impl QueueAdapter {
    /// Fails fast on an empty project id or subscription name.
    pub fn new(
        queue: ManagedQueue,
        project_id: impl Into<String>,
        subscription_name: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let project_id = project_id.into();
        let subscription_name = subscription_name.into();
        if project_id.trim().is_empty() {
            return Err(ConfigError::MissingProjectId);
        }
        if subscription_name.trim().is_empty() {
            return Err(ConfigError::EmptySubscriptionName);
        }
        Ok(Self {
            queue,
            project_id,
            subscription_name,
            closed: AtomicBool::new(false),
        })
    }

    pub fn subscription_name(&self) -> &str {
        &self.subscription_name
    }

    pub fn queue(&self) -> &ManagedQueue {
        &self.queue
    }

    fn subscription_for(&self, topic: &str) -> String {
        subscription_id(topic, &self.subscription_name)
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }

    fn ack_id(message: &Message) -> Result<&str, BrokerError> {
        match message.ack_handle() {
            AckHandle::AckId(id) => Ok(id),
            other => Err(BrokerError::Commit(format!(
                "queue adapter cannot settle {other:?}"
            ))),
        }
    }
}

impl BrokerAdapter for QueueAdapter {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.publish_with_metadata(topic, payload, Vec::new())
    }

    fn publish_with_metadata(
        &self,
        topic: &str,
        payload: &[u8],
        metadata: Vec<(String, String)>,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if topic.is_empty() {
            return Err(BrokerError::Rejected("topic name must not be empty".into()));
        }
        self.queue.publish(topic, payload.to_vec(), metadata);
        Ok(())
    }

    fn prepare(&self, topic: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.queue
            .create_subscription(&self.subscription_for(topic), topic);
        Ok(())
    }

    fn receive(&self, topic: &str, timeout_ms: u64) -> Result<Option<Message>, BrokerError> {
        self.prepare(topic)?;
        let subscription = self.subscription_for(topic);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut state = lock(&self.queue.inner.state);

        loop {
            self.ensure_open()?;
            if let Some((ack_id, record)) = self.queue.take_next(&mut state, &subscription) {
                let message = Message::new(topic, record.payload, AckHandle::AckId(ack_id))
                    .with_metadata(record.metadata)
                    .with_delivery_attempt(record.attempts);
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // Wake up early when an outstanding delivery is due for redelivery.
            let wake_at = state
                .subscriptions
                .get(&subscription)
                .and_then(Subscription::next_expiry)
                .map_or(deadline, |expiry| expiry.min(deadline));
            let wait = wake_at.saturating_duration_since(now);
            state = match self.queue.inner.ready.wait_timeout(state, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn commit(&self, message: Message) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let subscription = self.subscription_for(message.topic());
        let ack_id = Self::ack_id(&message)?;
        if self.queue.ack(&subscription, ack_id) {
            Ok(())
        } else {
            Err(BrokerError::Commit(format!(
                "ack id {ack_id} on {subscription} is unknown or expired"
            )))
        }
    }

    fn abandon(&self, message: Message) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let subscription = self.subscription_for(message.topic());
        let ack_id = Self::ack_id(&message)?;
        // An expired delivery is already queued again; nothing left to nack.
        self.queue.nack(&subscription, ack_id);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.queue.wake_all();
    }

    fn health(&self) -> Health {
        let health = if self.closed.load(Ordering::Acquire) {
            Health::down("GOOGLE")
        } else {
            Health::up("GOOGLE")
        };
        health
            .with_detail("project_id", &self.project_id)
            .with_detail("subscription_name", &self.subscription_name)
    }
}
