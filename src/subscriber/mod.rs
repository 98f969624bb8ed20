//! subscriber - per-topic handler dispatch.
//!
//! Register one handler per topic on a [`SubscriptionRegistry`]; a
//! [`Coordinator`] then runs one [`DispatchLoop`] per topic. Each handler
//! receives an [`ExecutionContext`] with the message, a publisher and the
//! shutdown cancellation flag.
//!
//! ## Commit policy
//!
//! | Handler outcome | Decision | Effect |
//! |---|---|---|
//! | `Ok(())` | Commit | `commit` is called; the message is not redelivered |
//! | `Err(_)` or panic | Redeliver | `abandon` is called; the broker redelivers |
//! | still running after the shutdown grace period | Redeliver | message abandoned |
//!
//! A handler that wants to skip a malformed message returns `Ok(())`.
//!
//! ## Handler Convention
//!
//! ```ignore
//! // src/handlers/order_status.rs
//!
//! pub const TOPIC: &str = "order-status";
//!
//! pub fn handle(ctx: &subscriber::ExecutionContext<'_>) -> Result<(), subscriber::HandlerError> {
//!     let Ok(update) = ctx.bind::<OrderStatus>() else {
//!         return Ok(());
//!     };
//!     ctx.publish("order-logs", format!("{} {}", update.order_id, update.status))?;
//!     Ok(())
//! }
//! ```

mod backoff;
mod context;
mod coordinator;
mod dispatch;
mod error;
mod registry;

pub use backoff::{Backoff, BackoffConfig};
pub use context::{Bind, Cancellation, ExecutionContext};
pub use coordinator::{Coordinator, ShutdownReport};
pub use dispatch::{
    CommitDecision, DispatchLoop, DispatchOptions, LoopHandle, LoopOutcome, LoopReport, LoopState,
    LoopStats,
};
pub use error::{CoordinatorError, HandlerError, RegistryError};
pub use registry::{HandlerFn, SubscriptionRegistry};
