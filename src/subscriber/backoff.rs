//! Exponential backoff for transient broker errors.
//!
//! Retries are never capped: a dispatch loop keeps consuming until it is
//! told to stop, so only the delay is bounded.

use std::time::Duration;

use serde::Deserialize;

/// Backoff settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Growth factor applied after each attempt.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Tracks consecutive transient failures for one dispatch loop.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
    current_delay: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let initial = Duration::from_millis(config.initial_delay_ms);
        Self {
            config,
            attempt: 0,
            current_delay: initial,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful receive.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay = Duration::from_millis(self.config.initial_delay_ms);
    }

    /// Delay to wait before the next attempt; grows until `max_delay_ms`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let max = Duration::from_millis(self.config.max_delay_ms);
        let delay = self.current_delay.min(max);

        let next_ms = (self.current_delay.as_millis() as f64 * self.config.multiplier.max(1.0)) as u64;
        self.current_delay = Duration::from_millis(next_ms).min(max);

        delay
    }
}
