//! Test doubles: a recording adapter and a gate that blocks one topic.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use pubsub_rust::bus::{
    AckHandle, BrokerAdapter, BrokerError, LogAdapter, ManagedQueue, Message, PartitionedLog,
    QueueAdapter,
};
use pubsub_rust::subscriber::BackoffConfig;
use pubsub_rust::{DispatchOptions, Health, PubSub};
use serde::{Deserialize, Serialize};

/// Order status update as published by the order service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatus {
    pub order_id: String,
    pub status: String,
}

/// One commit or abandon seen by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub topic: String,
    pub payload: Vec<u8>,
    pub ack: AckHandle,
}

/// Wraps a real adapter and records every settlement.
pub struct RecordingAdapter {
    inner: Arc<dyn BrokerAdapter>,
    commits: Mutex<Vec<Settlement>>,
    abandons: Mutex<Vec<Settlement>>,
    journal: Mutex<Vec<String>>,
}

impl RecordingAdapter {
    pub fn new(inner: Arc<dyn BrokerAdapter>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            commits: Mutex::new(Vec::new()),
            abandons: Mutex::new(Vec::new()),
            journal: Mutex::new(Vec::new()),
        })
    }

    pub fn commits(&self) -> Vec<Settlement> {
        self.commits.lock().unwrap().clone()
    }

    pub fn abandons(&self) -> Vec<Settlement> {
        self.abandons.lock().unwrap().clone()
    }

    pub fn committed_payloads(&self, topic: &str) -> Vec<String> {
        payloads(&self.commits(), topic)
    }

    pub fn abandoned_payloads(&self, topic: &str) -> Vec<String> {
        payloads(&self.abandons(), topic)
    }

    /// Append a free-form entry; commits and abandons are journaled too.
    pub fn note(&self, entry: impl Into<String>) {
        self.journal.lock().unwrap().push(entry.into());
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn settle(&self, list: &Mutex<Vec<Settlement>>, kind: &str, message: &Message) {
        self.note(format!(
            "{kind}:{}",
            String::from_utf8_lossy(message.payload())
        ));
        list.lock().unwrap().push(Settlement {
            topic: message.topic().to_string(),
            payload: message.payload().to_vec(),
            ack: message.ack_handle().clone(),
        });
    }
}

fn payloads(settlements: &[Settlement], topic: &str) -> Vec<String> {
    settlements
        .iter()
        .filter(|s| s.topic == topic)
        .map(|s| String::from_utf8_lossy(&s.payload).into_owned())
        .collect()
}

impl BrokerAdapter for RecordingAdapter {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.inner.publish(topic, payload)
    }

    fn publish_with_metadata(
        &self,
        topic: &str,
        payload: &[u8],
        metadata: Vec<(String, String)>,
    ) -> Result<(), BrokerError> {
        self.inner.publish_with_metadata(topic, payload, metadata)
    }

    fn prepare(&self, topic: &str) -> Result<(), BrokerError> {
        self.inner.prepare(topic)
    }

    fn receive(&self, topic: &str, timeout_ms: u64) -> Result<Option<Message>, BrokerError> {
        self.inner.receive(topic, timeout_ms)
    }

    fn commit(&self, message: Message) -> Result<(), BrokerError> {
        self.settle(&self.commits, "commit", &message);
        self.inner.commit(message)
    }

    fn abandon(&self, message: Message) -> Result<(), BrokerError> {
        self.settle(&self.abandons, "abandon", &message);
        self.inner.abandon(message)
    }

    fn close(&self) {
        self.inner.close()
    }

    fn health(&self) -> Health {
        self.inner.health()
    }
}

/// Blocks every `receive` on one topic until released, ignoring the timeout.
pub struct GatedAdapter {
    inner: Arc<dyn BrokerAdapter>,
    gated_topic: String,
    released: Mutex<bool>,
    gate: Condvar,
    waiting: AtomicUsize,
}

impl GatedAdapter {
    pub fn new(inner: Arc<dyn BrokerAdapter>, gated_topic: &str) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gated_topic: gated_topic.to_string(),
            released: Mutex::new(false),
            gate: Condvar::new(),
            waiting: AtomicUsize::new(0),
        })
    }

    /// Receive calls currently parked at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.gate.notify_all();
    }
}

impl BrokerAdapter for GatedAdapter {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.inner.publish(topic, payload)
    }

    fn prepare(&self, topic: &str) -> Result<(), BrokerError> {
        self.inner.prepare(topic)
    }

    fn receive(&self, topic: &str, timeout_ms: u64) -> Result<Option<Message>, BrokerError> {
        if topic == self.gated_topic {
            let mut released = self.released.lock().unwrap();
            self.waiting.fetch_add(1, Ordering::SeqCst);
            while !*released {
                released = self.gate.wait(released).unwrap();
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.receive(topic, timeout_ms)
    }

    fn commit(&self, message: Message) -> Result<(), BrokerError> {
        self.inner.commit(message)
    }

    fn abandon(&self, message: Message) -> Result<(), BrokerError> {
        self.inner.abandon(message)
    }

    fn close(&self) {
        self.release();
        self.inner.close()
    }

    fn health(&self) -> Health {
        self.inner.health()
    }
}

pub const GROUP: &str = "order-service";
pub const SUBSCRIPTION: &str = "order-consumer";

pub fn log_adapter(log: &PartitionedLog) -> Arc<dyn BrokerAdapter> {
    Arc::new(LogAdapter::new(log.clone(), GROUP).unwrap())
}

pub fn queue_adapter(queue: &ManagedQueue) -> Arc<dyn BrokerAdapter> {
    Arc::new(QueueAdapter::new(queue.clone(), "test-project", SUBSCRIPTION).unwrap())
}

pub fn fast_options() -> DispatchOptions {
    DispatchOptions {
        poll_timeout_ms: 10,
        backoff: BackoffConfig {
            initial_delay_ms: 1,
            max_delay_ms: 10,
            multiplier: 2.0,
        },
    }
}

pub fn pubsub(adapter: Arc<dyn BrokerAdapter>) -> PubSub {
    PubSub::with_adapter(adapter).with_options(fast_options())
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
