//! Order-status demo: consumes `order-status`, logs to `order-logs`, serves `/health`.
//!
//! Configuration comes from `PUBSUB_*` variables when `PUBSUB_BACKEND` is
//! set, otherwise an in-process Kafka-style log is used. `DEMO_HTTP_ADDR`
//! overrides the health listener address.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use pubsub_rust::{logging, Bind, PubSub, PubSubConfig};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderStatus {
    order_id: String,
    status: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init();

    let config = if std::env::var_os("PUBSUB_BACKEND").is_some() {
        PubSubConfig::from_env()?
    } else {
        PubSubConfig::kafka(["in-process"], "order-service")
    };
    let pubsub = Arc::new(PubSub::from_config(config)?);

    pubsub.subscribe("order-status", |ctx| {
        let Ok(update) = ctx.bind::<OrderStatus>() else {
            // Malformed updates are skipped, not redelivered.
            return Ok(());
        };
        ctx.publish(
            "order-logs",
            format!("order {} is {}", update.order_id, update.status),
        )?;
        Ok(())
    })?;
    pubsub.subscribe("order-logs", |ctx| {
        info!(line = ctx.message().payload_str().unwrap_or("<binary>"), "order log");
        Ok(())
    })?;

    pubsub.start()?;
    pubsub.publish("order-status", br#"{"orderId":"1","status":"shipped"}"#)?;

    let addr = std::env::var("DEMO_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    info!(%addr, "serving health");
    tokio::select! {
        result = pubsub_rust::http::serve(Arc::clone(&pubsub), &addr) => result?,
        _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
    }

    let report = tokio::task::spawn_blocking(move || pubsub.shutdown()).await?;
    info!(
        stopped = ?report.stopped,
        abandoned = ?report.abandoned,
        failed = ?report.failed,
        "shutdown complete"
    );
    Ok(())
}
