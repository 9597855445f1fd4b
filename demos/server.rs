//! Demo banking API behind the gatekeeper.
//!
//! ```bash
//! GATEKEEPER_THRESHOLD=5 RUST_LOG=request_gatekeeper=debug,info \
//!     cargo run --example server
//! ```
//!
//! Then hammer an endpoint and watch the 429 and 403 responses:
//!
//! ```bash
//! for i in $(seq 1 8); do curl -s -w ' %{http_code}\n' localhost:3000/api/balance; done
//! curl -s localhost:3000/dashboard/stats
//! curl -s -X POST localhost:3000/reset-redis
//! ```
//!
//! With `--features redis-storage` and `REDIS_URL` set, counters and records
//! live in Redis, so several instances share one budget.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use request_gatekeeper::{Gatekeeper, GatekeeperConfig};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatekeeperConfig::from_env()?;
    let gatekeeper = Arc::new(build(config).await?);

    let api = Router::new()
        .route("/api/balance", get(|| async { Json(json!({ "balance": 1000 })) }))
        .route(
            "/api/transfer",
            post(|| async { (StatusCode::CREATED, Json(json!({ "status": "queued" }))) }),
        )
        .route("/api/profile", get(|| async { Json(json!({ "name": "demo" })) }));

    let dashboard = Router::new()
        .route("/dashboard/stats", get(stats))
        .with_state(gatekeeper.clone());

    let app = api
        .merge(dashboard)
        .merge(gatekeeper.reset_router())
        .layer(gatekeeper.layer());

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
    info!(addr = %listener.local_addr()?, "demo server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    // The router and its layers are gone, so this is the last handle
    match Arc::try_unwrap(gatekeeper) {
        Ok(gatekeeper) => gatekeeper.shutdown().await?,
        Err(_) => tracing::warn!("gatekeeper still shared, queued log records dropped"),
    }
    Ok(())
}

#[cfg(feature = "redis-storage")]
async fn build(config: GatekeeperConfig) -> Result<Gatekeeper, Box<dyn std::error::Error>> {
    use request_gatekeeper::{RedisCounterStore, RedisRecordStore};

    let builder = Gatekeeper::builder(config);
    let builder = match std::env::var("REDIS_URL") {
        Ok(url) => {
            info!(%url, "using redis stores");
            builder
                .with_counter_store(Arc::new(RedisCounterStore::connect(&url).await?))
                .with_record_store(Arc::new(RedisRecordStore::connect(&url).await?))
        }
        Err(_) => builder,
    };
    Ok(builder.build()?)
}

#[cfg(not(feature = "redis-storage"))]
async fn build(config: GatekeeperConfig) -> Result<Gatekeeper, Box<dyn std::error::Error>> {
    Ok(Gatekeeper::builder(config).build()?)
}

async fn stats(State(gatekeeper): State<Arc<Gatekeeper>>) -> Result<Json<Value>, StatusCode> {
    let records = gatekeeper.records();
    let logs = records
        .recent_logs(50)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let alerts = records
        .recent_alerts(50)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok(Json(json!({
        "metrics": gatekeeper.metrics().snapshot(),
        "logs": logs,
        "alerts": alerts,
    })))
}
