//! Pub/sub configuration.
//!
//! The configuration is read once at start-up and validated before any
//! dispatch loop starts. Backend selection is a pure function of the
//! validated struct (see [`crate::bus::connect`]).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

use crate::subscriber::{BackoffConfig, DispatchOptions};

/// Errors detected while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown pub/sub backend: {0:?}")]
    UnknownBackend(String),
    #[error("subscription name must not be empty")]
    EmptySubscriptionName,
    #[error("kafka backend requires at least one broker address")]
    MissingBrokers,
    #[error("kafka backend requires a consumer group id")]
    MissingConsumerGroup,
    #[error("google backend requires a project id")]
    MissingProjectId,
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Supported broker kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Backend {
    /// Partitioned log with consumer-group offsets.
    Kafka,
    /// Managed queue with per-subscription acknowledgements.
    Google,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Kafka => "KAFKA",
            Backend::Google => "GOOGLE",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "KAFKA" => Ok(Backend::Kafka),
            "GOOGLE" => Ok(Backend::Google),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Resolved configuration for one application's pub/sub connection.
#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    pub backend: Backend,
    /// Kafka bootstrap addresses.
    #[serde(default)]
    pub brokers: Vec<String>,
    /// Kafka consumer group id.
    #[serde(default)]
    pub consumer_group: Option<String>,
    /// Google project id.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Google logical subscriber name; combined with each topic.
    #[serde(default)]
    pub subscription_name: Option<String>,
    /// Partitions per topic for the in-process log backend.
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Redelivery deadline for unacknowledged queue messages.
    #[serde(default = "default_ack_deadline_ms")]
    pub ack_deadline_ms: u64,
    /// How long one `receive` call may block before the loop re-checks shutdown.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Grace period given to in-flight handlers on shutdown.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_partitions() -> u32 {
    1
}

fn default_ack_deadline_ms() -> u64 {
    10_000
}

fn default_poll_timeout_ms() -> u64 {
    100
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl PubSubConfig {
    fn base(backend: Backend) -> Self {
        Self {
            backend,
            brokers: Vec::new(),
            consumer_group: None,
            project_id: None,
            subscription_name: None,
            partitions: default_partitions(),
            ack_deadline_ms: default_ack_deadline_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            backoff: BackoffConfig::default(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }

    /// Kafka configuration with defaults for everything else.
    pub fn kafka<I, S>(brokers: I, consumer_group: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            consumer_group: Some(consumer_group.into()),
            ..Self::base(Backend::Kafka)
        }
    }

    /// Google configuration with defaults for everything else.
    pub fn google(project_id: impl Into<String>, subscription_name: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            subscription_name: Some(subscription_name.into()),
            ..Self::base(Backend::Google)
        }
    }

    /// Load from `PUBSUB_*` environment variables and validate.
    ///
    /// `PUBSUB_BROKERS` is comma separated; nested keys use a double
    /// underscore (`PUBSUB_BACKOFF__MAX_DELAY_MS`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::default())
    }

    /// Load from the given environment source and validate.
    pub fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .add_source(
                env.prefix("PUBSUB")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("brokers"),
            )
            .build()?;

        let settings: PubSubConfig = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check backend-specific required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            Backend::Kafka => {
                if self.brokers.iter().all(|b| b.trim().is_empty()) {
                    return Err(ConfigError::MissingBrokers);
                }
                if is_blank(self.consumer_group.as_deref()) {
                    return Err(ConfigError::MissingConsumerGroup);
                }
            }
            Backend::Google => {
                if is_blank(self.project_id.as_deref()) {
                    return Err(ConfigError::MissingProjectId);
                }
                if is_blank(self.subscription_name.as_deref()) {
                    return Err(ConfigError::EmptySubscriptionName);
                }
            }
        }
        Ok(())
    }

    pub fn ack_deadline(&self) -> Duration {
        Duration::from_millis(self.ack_deadline_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Options for the dispatch loops derived from this configuration.
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            poll_timeout_ms: self.poll_timeout_ms,
            backoff: self.backoff.clone(),
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
