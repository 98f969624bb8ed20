//! Health reporting for broker adapters and dispatch loops.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::subscriber::LoopState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Down,
}

/// Health of one broker adapter.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: HealthStatus,
    /// Backend kind, e.g. `"KAFKA"` or `"GOOGLE"`.
    pub backend: String,
    /// Backend specific details (consumer group, project id, ...).
    pub details: BTreeMap<String, String>,
}

impl Health {
    pub fn up(backend: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Up,
            backend: backend.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn down(backend: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Down,
            ..Self::up(backend)
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }
}

/// Adapter health plus the state of every dispatch loop.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub backend: String,
    pub details: BTreeMap<String, String>,
    pub topics: BTreeMap<String, LoopState>,
}

impl ServiceHealth {
    /// Down if the adapter is down or any loop has stopped on its own.
    pub fn new(adapter: Health, topics: BTreeMap<String, LoopState>, running: bool) -> Self {
        let loops_ok = !running || topics.values().all(|s| *s != LoopState::Stopped);
        let status = if adapter.status == HealthStatus::Up && loops_ok {
            HealthStatus::Up
        } else {
            HealthStatus::Down
        };
        Self {
            status,
            backend: adapter.backend,
            details: adapter.details,
            topics,
        }
    }
}
