//! HTTP health endpoint - requires the `http` feature.
//!
//! ## Routes
//!
//! - `GET /health` - adapter health plus every dispatch loop's state, e.g.
//!   `{ "status": "UP", "backend": "KAFKA", "details": {...}, "topics": { "order-status": "pulling" } }`.
//!   Responds `503` while the service is down.
//!
//! ## Example
//!
//! ```ignore
//! let pubsub = Arc::new(PubSub::from_config(PubSubConfig::from_env()?)?);
//!
//! // Compose with other axum routes
//! let app = pubsub_rust::http::router(pubsub.clone());
//!
//! // Or serve directly
//! pubsub_rust::http::serve(pubsub, "0.0.0.0:3000").await?;
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::app::PubSub;
use crate::health::HealthStatus;

/// Build an axum `Router` exposing the health of `pubsub`.
pub fn router(pubsub: Arc<PubSub>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(pubsub)
}

/// Serve the health endpoint at the given address (e.g. `"0.0.0.0:3000"`).
pub async fn serve(pubsub: Arc<PubSub>, addr: &str) -> Result<(), std::io::Error> {
    let app = router(pubsub);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn health_handler(State(pubsub): State<Arc<PubSub>>) -> impl IntoResponse {
    let health = pubsub.health();
    let status = match health.status {
        HealthStatus::Up => StatusCode::OK,
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(health))
}
