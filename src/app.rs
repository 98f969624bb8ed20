//! Application surface: subscribe, publish, start and shut down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;

use crate::bus::{self, lock, BrokerAdapter, BrokerError, Publisher};
use crate::config::{ConfigError, PubSubConfig};
use crate::health::ServiceHealth;
use crate::subscriber::{
    Coordinator, CoordinatorError, DispatchOptions, ExecutionContext, HandlerError,
    RegistryError, ShutdownReport, SubscriptionRegistry,
};

/// Default grace period for [`PubSub::shutdown`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// One application's pub/sub connection.
///
/// Handlers are registered with [`subscribe`](Self::subscribe) during
/// setup; [`start`](Self::start) freezes the registry and spawns one
/// dispatch loop per topic. Publishing works before, during and after
/// dispatch, from any thread.
///
/// ## Example
///
/// ```
/// use pubsub_rust::{Bind, PubSub, PubSubConfig};
///
/// let pubsub = PubSub::from_config(PubSubConfig::kafka(["localhost:9092"], "order-service")).unwrap();
///
/// pubsub
///     .subscribe("order-status", |ctx| {
///         let Ok(update) = ctx.bind::<serde_json::Value>() else {
///             return Ok(());
///         };
///         ctx.publish("order-logs", update.to_string())?;
///         Ok(())
///     })
///     .unwrap();
///
/// pubsub.start().unwrap();
/// pubsub.publish("order-status", br#"{"orderId":"1","status":"shipped"}"#).unwrap();
///
/// let report = pubsub.shutdown();
/// assert_eq!(report.stopped, vec!["order-status"]);
/// ```
pub struct PubSub {
    adapter: Arc<dyn BrokerAdapter>,
    publisher: Publisher,
    registry: SubscriptionRegistry,
    coordinator: Mutex<Option<Coordinator>>,
    options: DispatchOptions,
    shutdown_timeout: Duration,
}

impl PubSub {
    /// Validate `config` and connect to the backend it selects.
    pub fn from_config(config: PubSubConfig) -> Result<Self, ConfigError> {
        let adapter = bus::connect(&config)?;
        Ok(Self::with_adapter(adapter)
            .with_options(config.dispatch_options())
            .with_shutdown_timeout(config.shutdown_timeout()))
    }

    /// Use an already constructed adapter.
    pub fn with_adapter(adapter: Arc<dyn BrokerAdapter>) -> Self {
        Self {
            publisher: Publisher::new(Arc::clone(&adapter)),
            adapter,
            registry: SubscriptionRegistry::new(),
            coordinator: Mutex::new(None),
            options: DispatchOptions::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Register the handler for `topic`. Fails on a duplicate topic or
    /// once dispatch has started.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&ExecutionContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.registry.register(topic, handler)?;
        info!(topic, "handler registered");
        Ok(())
    }

    /// Registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.registry.topics()
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn adapter(&self) -> &Arc<dyn BrokerAdapter> {
        &self.adapter
    }

    /// Publish raw bytes to `topic`.
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) -> Result<(), BrokerError> {
        self.publisher.publish(topic, payload)
    }

    /// Start one dispatch loop per registered topic.
    pub fn start(&self) -> Result<(), CoordinatorError> {
        let mut slot = lock(&self.coordinator);
        if slot.is_some() {
            return Err(CoordinatorError::AlreadyStarted);
        }

        let mut coordinator = Coordinator::new(
            Arc::clone(&self.adapter),
            self.registry.clone(),
            self.options.clone(),
        );
        coordinator.start()?;
        *slot = Some(coordinator);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        lock(&self.coordinator).is_some()
    }

    /// Adapter health plus the state of every loop.
    pub fn health(&self) -> ServiceHealth {
        let slot = lock(&self.coordinator);
        let running = slot.is_some();
        let states = slot.as_ref().map(Coordinator::states).unwrap_or_default();
        ServiceHealth::new(self.adapter.health(), states, running)
    }

    /// Shut down with the configured grace period.
    pub fn shutdown(&self) -> ShutdownReport {
        self.shutdown_timeout(self.shutdown_timeout)
    }

    /// Stop every loop, wait up to `timeout` for in-flight handlers, then
    /// close the adapter.
    pub fn shutdown_timeout(&self, timeout: Duration) -> ShutdownReport {
        let coordinator = lock(&self.coordinator).take();
        let report = coordinator
            .map(|c| c.shutdown(timeout))
            .unwrap_or_default();
        self.adapter.close();
        report
    }
}
