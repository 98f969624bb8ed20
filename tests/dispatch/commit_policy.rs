//! The handler's return value is the only commit signal.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pubsub_rust::bus::{ManagedQueue, PartitionedLog};
use pubsub_rust::HandlerError;

use crate::support::{log_adapter, pubsub, queue_adapter, wait_until, RecordingAdapter, GROUP};

#[test]
fn ok_commits_each_message_exactly_once() {
    let log = PartitionedLog::new(1);
    let adapter = RecordingAdapter::new(log_adapter(&log));
    let app = pubsub(adapter.clone());
    app.subscribe("t", |_ctx| Ok(())).unwrap();
    app.start().unwrap();

    for i in 0..5 {
        app.publish("t", format!("m{i}")).unwrap();
    }
    assert!(wait_until(|| adapter.commits().len() == 5));

    let report = app.shutdown_timeout(Duration::from_secs(2));
    assert_eq!(adapter.committed_payloads("t"), vec!["m0", "m1", "m2", "m3", "m4"]);
    assert!(adapter.abandons().is_empty());
    assert_eq!(report.stats["t"].committed, 5);

    // Every ack handle settled once.
    let mut handles: Vec<_> = adapter.commits().into_iter().map(|s| s.ack).collect();
    handles.dedup();
    assert_eq!(handles.len(), 5);
    assert_eq!(log.committed_offset(GROUP, "t", 0), Some(5));
}

#[test]
fn error_never_commits_and_log_retries_same_offset() {
    let log = PartitionedLog::new(1);
    let adapter = RecordingAdapter::new(log_adapter(&log));
    let app = pubsub(adapter.clone());
    app.subscribe("t", |_ctx| Err(HandlerError::Rejected("not yet".into())))
        .unwrap();
    app.start().unwrap();

    app.publish("t", "a").unwrap();
    app.publish("t", "b").unwrap();
    assert!(wait_until(|| adapter.abandons().len() >= 3));

    let report = app.shutdown_timeout(Duration::from_secs(2));
    assert!(adapter.commits().is_empty());
    // "b" is never handed out while "a" keeps failing.
    assert!(adapter.abandoned_payloads("t").iter().all(|p| p == "a"));
    assert!(report.stats["t"].redelivered >= 3);
    assert_eq!(log.committed_offset(GROUP, "t", 0), None);
}

#[test]
fn panicking_handler_is_redelivered_and_loop_survives() {
    let log = PartitionedLog::new(1);
    let adapter = RecordingAdapter::new(log_adapter(&log));
    let app = pubsub(adapter.clone());
    app.subscribe("t", |ctx| {
        if ctx.message().payload() == b"boom" && ctx.delivery_attempt() == 1 {
            panic!("handler bug");
        }
        Ok(())
    })
    .unwrap();
    app.start().unwrap();

    app.publish("t", "boom").unwrap();
    app.publish("t", "fine").unwrap();
    assert!(wait_until(|| adapter.commits().len() == 2));

    let report = app.shutdown_timeout(Duration::from_secs(2));
    assert_eq!(adapter.abandoned_payloads("t"), vec!["boom"]);
    assert_eq!(adapter.committed_payloads("t"), vec!["boom", "fine"]);
    assert_eq!(report.stats["t"].panics, 1);
    assert_eq!(report.stopped, vec!["t"]);
}

#[test]
fn queue_backend_redelivers_until_handler_succeeds() {
    let queue = ManagedQueue::new(Duration::from_secs(30));
    let adapter = RecordingAdapter::new(queue_adapter(&queue));
    let attempts = Arc::new(Mutex::new(Vec::new()));
    let app = pubsub(adapter.clone());

    let seen = Arc::clone(&attempts);
    app.subscribe("t", move |ctx| {
        seen.lock().unwrap().push(ctx.delivery_attempt());
        if ctx.delivery_attempt() < 3 {
            Err(HandlerError::Rejected("not yet".into()))
        } else {
            Ok(())
        }
    })
    .unwrap();
    app.start().unwrap();

    app.publish("t", "flaky").unwrap();
    assert!(wait_until(|| adapter.commits().len() == 1));
    app.shutdown_timeout(Duration::from_secs(2));

    assert_eq!(*attempts.lock().unwrap(), vec![1, 2, 3]);
    assert_eq!(adapter.abandoned_payloads("t"), vec!["flaky", "flaky"]);
    assert_eq!(queue.outstanding("t-order-consumer"), 0);
    assert_eq!(queue.pending("t-order-consumer"), 0);
}

#[test]
fn commit_failure_is_counted_not_fatal() {
    let queue = ManagedQueue::new(Duration::from_millis(30));
    let adapter = RecordingAdapter::new(queue_adapter(&queue));
    let app = pubsub(adapter.clone());
    // Outlives the ack deadline, so the ack id is stale by commit time.
    app.subscribe("t", |ctx| {
        if ctx.delivery_attempt() == 1 {
            std::thread::sleep(Duration::from_millis(80));
        }
        Ok(())
    })
    .unwrap();
    app.start().unwrap();

    app.publish("t", "late").unwrap();
    assert!(wait_until(|| adapter.commits().len() == 2));

    let report = app.shutdown_timeout(Duration::from_secs(2));
    assert_eq!(report.stats["t"].commit_failures, 1);
    assert_eq!(report.stats["t"].committed, 1);
    assert_eq!(report.stopped, vec!["t"]);
}
