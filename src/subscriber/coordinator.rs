//! Starts one dispatch loop per registered topic and shuts them down.

use std::collections::BTreeMap;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use super::dispatch::{
    DispatchLoop, DispatchOptions, LoopHandle, LoopOutcome, LoopReport, LoopState, LoopStats,
};
use super::error::CoordinatorError;
use super::registry::SubscriptionRegistry;
use crate::bus::{BrokerAdapter, Publisher};

/// How long a loop torn down between steps gets to report its exit.
const SETTLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Outcome of [`Coordinator::shutdown`], one entry per topic.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Loops that reached `Stopped` after draining.
    pub stopped: Vec<String>,
    /// Loops that ended early on a fatal broker error.
    pub failed: Vec<String>,
    /// Loops whose in-flight message was abandoned when the grace period ran out.
    pub abandoned: Vec<String>,
    /// Loops still blocked in `receive` or `commit` when the grace period ran out.
    pub detached: Vec<String>,
    /// Final statistics of every loop that reported back.
    pub stats: BTreeMap<String, LoopStats>,
}

impl ShutdownReport {
    /// True if every loop stopped on its own within the grace period.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.abandoned.is_empty() && self.detached.is_empty()
    }
}

struct RunningLoop {
    handle: LoopHandle,
    thread: Option<JoinHandle<()>>,
}

/// Owns the dispatch loops of one application.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use pubsub_rust::bus::{LogAdapter, PartitionedLog};
/// use pubsub_rust::subscriber::{Coordinator, DispatchOptions, SubscriptionRegistry};
///
/// let adapter = Arc::new(LogAdapter::new(PartitionedLog::new(1), "orders").unwrap());
/// let registry = SubscriptionRegistry::new();
/// registry.register("order-status", |_ctx| Ok(())).unwrap();
///
/// let mut coordinator = Coordinator::new(adapter, registry, DispatchOptions::default());
/// coordinator.start().unwrap();
///
/// let report = coordinator.shutdown(Duration::from_secs(1));
/// assert_eq!(report.stopped, vec!["order-status"]);
/// ```
pub struct Coordinator {
    adapter: Arc<dyn BrokerAdapter>,
    publisher: Publisher,
    registry: SubscriptionRegistry,
    options: DispatchOptions,
    loops: BTreeMap<String, RunningLoop>,
    exits: Option<Receiver<LoopReport>>,
    reports: BTreeMap<String, LoopReport>,
}

impl Coordinator {
    pub fn new(
        adapter: Arc<dyn BrokerAdapter>,
        registry: SubscriptionRegistry,
        options: DispatchOptions,
    ) -> Self {
        Self {
            publisher: Publisher::new(Arc::clone(&adapter)),
            adapter,
            registry,
            options,
            loops: BTreeMap::new(),
            exits: None,
            reports: BTreeMap::new(),
        }
    }

    /// Freeze the registry and spawn one loop per topic.
    ///
    /// Every topic is prepared on the adapter before any loop starts, so a
    /// broker that refuses a subscription fails the whole start.
    pub fn start(&mut self) -> Result<(), CoordinatorError> {
        if self.exits.is_some() {
            return Err(CoordinatorError::AlreadyStarted);
        }
        self.registry.freeze();

        let topics = self.registry.topics();
        for topic in &topics {
            self.adapter
                .prepare(topic)
                .map_err(|source| CoordinatorError::Prepare {
                    topic: topic.clone(),
                    source,
                })?;
        }

        let (exit_tx, exit_rx) = channel();
        self.exits = Some(exit_rx);

        for topic in topics {
            let Some(handler) = self.registry.lookup(&topic) else {
                continue;
            };
            let (dispatch, handle) = DispatchLoop::new(
                topic.clone(),
                handler,
                Arc::clone(&self.adapter),
                self.publisher.clone(),
                self.options.clone(),
            );

            let exit_tx = exit_tx.clone();
            let thread = thread::Builder::new()
                .name(format!("dispatch-{topic}"))
                .spawn(move || {
                    let _ = exit_tx.send(dispatch.run());
                })?;

            self.loops.insert(
                topic,
                RunningLoop {
                    handle,
                    thread: Some(thread),
                },
            );
        }

        info!(topics = self.loops.len(), "dispatch loops started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.exits.is_some()
    }

    /// Current state of every loop.
    pub fn states(&self) -> BTreeMap<String, LoopState> {
        self.loops
            .iter()
            .map(|(topic, running)| (topic.clone(), running.handle.state()))
            .collect()
    }

    /// Topics whose loop already ended on a fatal broker error.
    pub fn failed_topics(&mut self) -> Vec<String> {
        self.collect_exits();
        self.reports
            .values()
            .filter(|r| matches!(r.outcome, LoopOutcome::Failed(_)))
            .map(|r| r.topic.clone())
            .collect()
    }

    /// Signal every loop, wait up to `timeout`, then give up on the rest.
    pub fn shutdown(mut self, timeout: Duration) -> ShutdownReport {
        info!(timeout_ms = timeout.as_millis() as u64, "shutting down dispatch loops");
        for running in self.loops.values() {
            running.handle.signal_stop();
        }

        let deadline = Instant::now() + timeout;
        self.collect_exits();
        if let Some(exits) = &self.exits {
            while self.reports.len() < self.loops.len() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match exits.recv_timeout(remaining) {
                    Ok(report) => {
                        self.reports.insert(report.topic.clone(), report);
                    }
                    Err(_) => break,
                }
            }
        }

        let mut report = ShutdownReport::default();
        for (topic, mut running) in std::mem::take(&mut self.loops) {
            let exit = match self.reports.remove(&topic) {
                Some(exit) => Some(exit),
                None => match running.handle.tear_down() {
                    LoopState::Invoking => {
                        warn!(topic = %topic, "grace period elapsed with handler in flight, message abandoned");
                        report.abandoned.push(topic);
                        continue;
                    }
                    LoopState::Pulling => None,
                    // Between steps or finishing a commit; it exits on its own shortly.
                    _ => self.await_exit(&topic, Instant::now() + SETTLE_TIMEOUT),
                },
            };

            let Some(exit) = exit else {
                warn!(topic = %topic, state = ?running.handle.state(), "dispatch loop did not stop in time, detaching");
                report.detached.push(topic);
                continue;
            };
            if let Some(thread) = running.thread.take() {
                let _ = thread.join();
            }
            match exit.outcome {
                LoopOutcome::Stopped => report.stopped.push(topic.clone()),
                LoopOutcome::Failed(_) => report.failed.push(topic.clone()),
            }
            report.stats.insert(topic, exit.stats);
        }

        info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            detached = report.detached.len(),
            "dispatch loops shut down"
        );
        report
    }

    /// Wait until `deadline` for `topic`'s exit report.
    fn await_exit(&mut self, topic: &str, deadline: Instant) -> Option<LoopReport> {
        loop {
            if let Some(exit) = self.reports.remove(topic) {
                return Some(exit);
            }
            let exits = self.exits.as_ref()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match exits.recv_timeout(remaining) {
                Ok(report) => {
                    self.reports.insert(report.topic.clone(), report);
                }
                Err(_) => return None,
            }
        }
    }

    fn collect_exits(&mut self) {
        if let Some(exits) = &self.exits {
            while let Ok(report) = exits.try_recv() {
                self.reports.insert(report.topic.clone(), report);
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        for running in self.loops.values() {
            running.handle.signal_stop();
        }
    }
}
