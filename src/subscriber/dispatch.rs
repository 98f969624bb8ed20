//! Per-topic pull, invoke, commit loop.
//!
//! ```text
//! Idle -> Pulling -> Invoking -> Committing -> Pulling ...
//!            |                                   |
//!            +--> Draining -> Stopped <----------+
//! ```
//!
//! Processing within one topic is strictly sequential: the next message is
//! not pulled until the current one has been committed or abandoned.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use super::backoff::{Backoff, BackoffConfig};
use super::context::{Cancellation, ExecutionContext};
use super::error::HandlerError;
use super::registry::HandlerFn;
use crate::bus::{lock, BrokerAdapter, BrokerError, ErrorKind, Message, Publisher};

/// Where a dispatch loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Pulling,
    Invoking,
    Committing,
    Draining,
    Stopped,
}

/// What to do with a message once its handler has returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitDecision {
    Commit,
    Redeliver,
}

impl CommitDecision {
    /// The handler's return value is the only commit signal.
    pub fn from_outcome(outcome: &Result<(), HandlerError>) -> Self {
        match outcome {
            Ok(()) => CommitDecision::Commit,
            Err(_) => CommitDecision::Redeliver,
        }
    }
}

/// Statistics from one dispatch loop.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub polls: usize,
    pub received: usize,
    pub committed: usize,
    pub redelivered: usize,
    pub commit_failures: usize,
    pub transient_errors: usize,
    pub panics: usize,
}

/// Tuning shared by every dispatch loop of an application.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Longest single `receive` wait; bounds how late a stop is noticed.
    pub poll_timeout_ms: u64,
    pub backoff: BackoffConfig,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            backoff: BackoffConfig::default(),
        }
    }
}

/// How a loop ended.
#[derive(Debug)]
pub enum LoopOutcome {
    /// Stop was requested or the adapter was closed.
    Stopped,
    /// A fatal broker error ended consumption for the topic.
    Failed(BrokerError),
}

/// Sent by a loop when it exits.
#[derive(Debug)]
pub struct LoopReport {
    pub topic: String,
    pub stats: LoopStats,
    pub outcome: LoopOutcome,
}

#[derive(Debug)]
struct LoopStatus {
    state: LoopState,
    torn_down: bool,
}

/// Control side of a running [`DispatchLoop`].
#[derive(Debug)]
pub struct LoopHandle {
    topic: String,
    stop_tx: Sender<()>,
    cancellation: Cancellation,
    status: Arc<Mutex<LoopStatus>>,
}

impl LoopHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Ask the loop to drain and set the handler's cancellation flag.
    pub fn signal_stop(&self) {
        self.cancellation.cancel();
        let _ = self.stop_tx.send(());
    }

    pub fn state(&self) -> LoopState {
        lock(&self.status).state
    }

    /// Give up on the loop after the grace period.
    ///
    /// Returns the state it was in. A handler still running will have its
    /// message abandoned instead of committed once it returns.
    pub fn tear_down(&self) -> LoopState {
        let mut status = lock(&self.status);
        status.torn_down = true;
        status.state
    }
}

/// One topic's long-lived consumer.
pub struct DispatchLoop {
    topic: String,
    handler: HandlerFn,
    adapter: Arc<dyn BrokerAdapter>,
    publisher: Publisher,
    options: DispatchOptions,
    stop_rx: Receiver<()>,
    cancellation: Cancellation,
    status: Arc<Mutex<LoopStatus>>,
    stats: LoopStats,
}

impl DispatchLoop {
    pub fn new(
        topic: impl Into<String>,
        handler: HandlerFn,
        adapter: Arc<dyn BrokerAdapter>,
        publisher: Publisher,
        options: DispatchOptions,
    ) -> (Self, LoopHandle) {
        let topic = topic.into();
        let (stop_tx, stop_rx) = channel();
        let cancellation = Cancellation::new();
        let status = Arc::new(Mutex::new(LoopStatus {
            state: LoopState::Idle,
            torn_down: false,
        }));

        let handle = LoopHandle {
            topic: topic.clone(),
            stop_tx,
            cancellation: cancellation.clone(),
            status: Arc::clone(&status),
        };
        let dispatch = Self {
            topic,
            handler,
            adapter,
            publisher,
            options,
            stop_rx,
            cancellation,
            status,
            stats: LoopStats::default(),
        };
        (dispatch, handle)
    }

    /// Consume until stopped, closed or a fatal broker error.
    pub fn run(mut self) -> LoopReport {
        let span = info_span!("dispatch_loop", topic = %self.topic);
        let _enter = span.enter();
        info!("dispatch loop started");

        let mut backoff = Backoff::new(self.options.backoff.clone());

        let outcome = loop {
            if self.stop_requested() {
                break LoopOutcome::Stopped;
            }

            self.set_state(LoopState::Pulling);
            self.stats.polls += 1;

            match self.adapter.receive(&self.topic, self.options.poll_timeout_ms) {
                Ok(Some(message)) => {
                    backoff.reset();
                    self.stats.received += 1;
                    self.dispatch(message);
                }
                Ok(None) => backoff.reset(),
                Err(err) => match err.kind() {
                    ErrorKind::Transient => {
                        self.stats.transient_errors += 1;
                        let delay = backoff.next_delay();
                        warn!(
                            error = %err,
                            attempt = backoff.attempt(),
                            delay_ms = delay.as_millis() as u64,
                            "transient broker error, retrying"
                        );
                        if self.wait_or_stop(delay) {
                            break LoopOutcome::Stopped;
                        }
                    }
                    ErrorKind::Closed => {
                        info!("adapter closed");
                        break LoopOutcome::Stopped;
                    }
                    ErrorKind::Fatal => {
                        error!(error = %err, "fatal broker error, topic consumption ends");
                        break LoopOutcome::Failed(err);
                    }
                },
            }
        };

        if matches!(outcome, LoopOutcome::Stopped) {
            self.set_state(LoopState::Draining);
        }
        self.set_state(LoopState::Stopped);
        info!(
            received = self.stats.received,
            committed = self.stats.committed,
            redelivered = self.stats.redelivered,
            "dispatch loop stopped"
        );

        LoopReport {
            topic: self.topic,
            stats: self.stats,
            outcome,
        }
    }

    fn dispatch(&mut self, message: Message) {
        if !self.enter(LoopState::Invoking) {
            self.abandon(message);
            return;
        }
        debug!(
            delivery_attempt = message.delivery_attempt(),
            bytes = message.payload().len(),
            "invoking handler"
        );

        let outcome = self.invoke(&message);
        match &outcome {
            Ok(()) => {}
            Err(HandlerError::Panicked(reason)) => {
                self.stats.panics += 1;
                error!(panic = %reason, "handler panicked, message left for redelivery");
            }
            Err(err) => warn!(error = %err, "handler failed, message left for redelivery"),
        }

        if !self.enter(LoopState::Committing) {
            warn!("grace period elapsed during handler, abandoning message");
            self.abandon(message);
            return;
        }

        match CommitDecision::from_outcome(&outcome) {
            CommitDecision::Commit => match self.adapter.commit(message) {
                Ok(()) => {
                    self.stats.committed += 1;
                    debug!("message committed");
                }
                Err(err) => {
                    self.stats.commit_failures += 1;
                    warn!(error = %err, "commit failed, message may be redelivered");
                }
            },
            CommitDecision::Redeliver => self.abandon(message),
        }
    }

    /// Run the handler; a panic becomes [`HandlerError::Panicked`].
    fn invoke(&self, message: &Message) -> Result<(), HandlerError> {
        let ctx = ExecutionContext::new(message, &self.publisher, &self.cancellation);
        panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(&ctx)))
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))))
    }

    fn abandon(&mut self, message: Message) {
        self.stats.redelivered += 1;
        if let Err(err) = self.adapter.abandon(message) {
            warn!(error = %err, "failed to release message for redelivery");
        }
    }

    /// Move to `next` unless the coordinator has torn the loop down.
    fn enter(&self, next: LoopState) -> bool {
        let mut status = lock(&self.status);
        if status.torn_down {
            return false;
        }
        status.state = next;
        true
    }

    fn set_state(&self, next: LoopState) {
        lock(&self.status).state = next;
    }

    fn stop_requested(&self) -> bool {
        match self.stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// Sleep for `delay`, waking early on stop. Returns true if stopped.
    fn wait_or_stop(&self, delay: Duration) -> bool {
        match self.stop_rx.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
