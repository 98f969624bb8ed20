//! A blocked or failed topic never holds up another topic.

use std::sync::Arc;
use std::time::Duration;

use pubsub_rust::bus::{BrokerAdapter, BrokerError, Message, PartitionedLog};
use pubsub_rust::{Health, LoopState};

use crate::support::{log_adapter, pubsub, wait_until, GatedAdapter, RecordingAdapter};

#[test]
fn blocked_receive_on_one_topic_does_not_delay_another() {
    let log = PartitionedLog::new(1);
    let recording = RecordingAdapter::new(log_adapter(&log));
    let gated = GatedAdapter::new(recording.clone(), "stuck");
    let app = pubsub(gated.clone());
    app.subscribe("stuck", |_ctx| Ok(())).unwrap();
    app.subscribe("flowing", |_ctx| Ok(())).unwrap();
    app.start().unwrap();

    app.publish("stuck", "waiting").unwrap();
    for i in 0..3 {
        app.publish("flowing", i.to_string()).unwrap();
    }
    assert!(wait_until(|| recording.committed_payloads("flowing").len() == 3));
    assert!(recording.committed_payloads("stuck").is_empty());
    assert_eq!(app.health().topics["stuck"], LoopState::Pulling);

    gated.release();
    assert!(wait_until(|| recording.committed_payloads("stuck") == vec!["waiting"]));
    app.shutdown_timeout(Duration::from_secs(2));
}

/// Connection to one topic's partition leader is gone for good.
struct BrokenTopic {
    inner: Arc<dyn BrokerAdapter>,
    broken: &'static str,
}

impl BrokerAdapter for BrokenTopic {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.inner.publish(topic, payload)
    }

    fn receive(&self, topic: &str, timeout_ms: u64) -> Result<Option<Message>, BrokerError> {
        if topic == self.broken {
            return Err(BrokerError::Connection("leader unreachable".into()));
        }
        self.inner.receive(topic, timeout_ms)
    }

    fn commit(&self, message: Message) -> Result<(), BrokerError> {
        self.inner.commit(message)
    }

    fn close(&self) {
        self.inner.close()
    }

    fn health(&self) -> Health {
        self.inner.health()
    }
}

#[test]
fn fatal_error_stops_only_the_affected_topic() {
    let log = PartitionedLog::new(1);
    let recording = RecordingAdapter::new(log_adapter(&log));
    let app = pubsub(Arc::new(BrokenTopic {
        inner: recording.clone(),
        broken: "payments",
    }));
    app.subscribe("payments", |_ctx| Ok(())).unwrap();
    app.subscribe("orders", |_ctx| Ok(())).unwrap();
    app.start().unwrap();

    assert!(wait_until(|| app.health().topics["payments"] == LoopState::Stopped));
    assert_eq!(app.health().status, pubsub_rust::HealthStatus::Down);

    app.publish("orders", "o-1").unwrap();
    assert!(wait_until(|| recording.committed_payloads("orders") == vec!["o-1"]));

    let report = app.shutdown_timeout(Duration::from_secs(2));
    assert_eq!(report.failed, vec!["payments"]);
    assert_eq!(report.stopped, vec!["orders"]);
}

/// Throttles the first few receives on every topic.
struct Throttled {
    inner: Arc<dyn BrokerAdapter>,
    remaining: std::sync::Mutex<usize>,
}

impl BrokerAdapter for Throttled {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.inner.publish(topic, payload)
    }

    fn receive(&self, topic: &str, timeout_ms: u64) -> Result<Option<Message>, BrokerError> {
        let mut remaining = self.remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(BrokerError::Transient("throttled".into()));
        }
        drop(remaining);
        self.inner.receive(topic, timeout_ms)
    }

    fn commit(&self, message: Message) -> Result<(), BrokerError> {
        self.inner.commit(message)
    }

    fn health(&self) -> Health {
        self.inner.health()
    }
}

#[test]
fn transient_errors_are_retried_without_reaching_the_handler() {
    let log = PartitionedLog::new(1);
    let recording = RecordingAdapter::new(log_adapter(&log));
    let app = pubsub(Arc::new(Throttled {
        inner: recording.clone(),
        remaining: std::sync::Mutex::new(5),
    }));
    app.subscribe("t", |_ctx| Ok(())).unwrap();
    app.publish("t", "eventually").unwrap();
    app.start().unwrap();

    assert!(wait_until(|| recording.committed_payloads("t") == vec!["eventually"]));
    let report = app.shutdown_timeout(Duration::from_secs(2));
    assert_eq!(report.stats["t"].transient_errors, 5);
    assert_eq!(report.stats["t"].received, 1);
}
