//! pubsub_rust - broker-agnostic publish/subscribe for Rust services.
//!
//! Application code registers one handler per topic and publishes to any
//! topic, without depending on which broker is configured. Each topic gets
//! its own dispatch loop that pulls a message, invokes the handler and
//! commits only when the handler returns `Ok(())`.
//!
//! ## Quick Start
//!
//! ```
//! use pubsub_rust::{Bind, PubSub, PubSubConfig};
//!
//! let pubsub = PubSub::from_config(PubSubConfig::google("my-project", "order-consumer")).unwrap();
//!
//! pubsub
//!     .subscribe("order-status", |ctx| {
//!         let update: serde_json::Value = ctx.bind()?;
//!         ctx.publish("order-logs", update.to_string())?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! pubsub.start().unwrap();
//! pubsub.publish("order-status", br#"{"orderId":"1","status":"shipped"}"#).unwrap();
//! pubsub.shutdown();
//! ```
//!
//! ## Modules
//!
//! - [`bus`] - the [`BrokerAdapter`] contract, [`Publisher`] and in-process backends
//! - [`subscriber`] - registry, dispatch loops and the lifecycle coordinator
//! - [`config`] - configuration loading and validation
//! - [`health`] - adapter and loop health
//! - `http` - `GET /health` router (requires the `http` feature)

pub mod app;
pub mod bus;
pub mod config;
pub mod health;
pub mod logging;
pub mod subscriber;

#[cfg(feature = "http")]
pub mod http;

pub use app::{PubSub, DEFAULT_SHUTDOWN_TIMEOUT};
pub use bus::{AckHandle, BrokerAdapter, BrokerError, ErrorKind, Message, Publisher};
pub use config::{Backend, ConfigError, PubSubConfig};
pub use health::{Health, HealthStatus, ServiceHealth};
pub use subscriber::{
    Bind, CommitDecision, CoordinatorError, DispatchOptions, ExecutionContext, HandlerError,
    LoopState, RegistryError, ShutdownReport,
};
