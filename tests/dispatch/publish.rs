//! Publishing from many threads through one facade.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use pubsub_rust::bus::{ManagedQueue, PartitionedLog, Publisher};
use pubsub_rust::{BrokerAdapter, BrokerError};
use serde_json::json;

use crate::support::{log_adapter, queue_adapter, GROUP};

#[test]
fn fifty_concurrent_request_handlers_publish() {
    let log = PartitionedLog::new(4);
    let publisher = Publisher::new(log_adapter(&log));

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let publisher = publisher.clone();
            thread::spawn(move || {
                publisher.publish_json("order-logs", &json!({ "request": i, "event": "viewed" }))
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let requests: BTreeSet<i64> = log
        .payloads("order-logs")
        .iter()
        .map(|p| serde_json::from_slice::<serde_json::Value>(p).unwrap()["request"].as_i64().unwrap())
        .collect();
    assert_eq!(requests, (0..50).collect());
}

#[test]
fn each_failed_publish_returns_its_own_error() {
    let log = PartitionedLog::new(1);
    let adapter = log_adapter(&log);
    let publisher = Publisher::new(Arc::clone(&adapter));

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let publisher = publisher.clone();
            // Every fifth caller uses an invalid topic.
            let topic = if i % 5 == 0 { "" } else { "order-logs" };
            thread::spawn(move || (i, publisher.publish(topic, format!("{i}"))))
        })
        .collect();

    let mut failed = Vec::new();
    for handle in handles {
        let (i, result) = handle.join().unwrap();
        match result {
            Ok(()) => {}
            Err(BrokerError::Rejected(_)) => failed.push(i),
            Err(other) => panic!("unexpected error for caller {i}: {other}"),
        }
    }
    failed.sort();
    assert_eq!(failed, vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45]);
    assert_eq!(log.len("order-logs"), 40);
}

#[test]
fn one_publisher_serves_many_topics() {
    let queue = ManagedQueue::new(std::time::Duration::from_secs(10));
    let adapter = queue_adapter(&queue);
    adapter.prepare("order-status").unwrap();
    adapter.prepare("order-logs").unwrap();
    let publisher = Publisher::new(adapter);

    publisher.publish("order-status", "shipped").unwrap();
    publisher.publish("order-logs", "order 1 shipped").unwrap();
    publisher
        .publish_batch("order-logs", &[b"a".to_vec(), b"b".to_vec()])
        .unwrap();

    assert_eq!(queue.pending("order-status-order-consumer"), 1);
    assert_eq!(queue.pending("order-logs-order-consumer"), 3);
}

#[test]
fn publish_after_close_is_rejected() {
    let log = PartitionedLog::new(1);
    let adapter = log_adapter(&log);
    let publisher = Publisher::new(Arc::clone(&adapter));
    adapter.close();

    assert!(matches!(publisher.publish("t", "x"), Err(BrokerError::Closed)));
    assert!(log.is_empty("t"));
    assert_eq!(log.committed_offset(GROUP, "t", 0), None);
}
