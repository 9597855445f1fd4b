//! # request-gatekeeper
//!
//! Per-client rate limiting, bans, security alerts and audit logging for axum
//! services.
//!
//! This crate provides a tower `Layer` that admits or rejects each inbound
//! request based on a per-client request budget. A client exceeding its budget
//! within one window is banned until an operator reset, and exactly one
//! security alert is recorded for the ban. Every completed request, admitted
//! or not, produces one audit log record.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use request_gatekeeper::{Gatekeeper, GatekeeperConfig};
//! use axum::{routing::get, Router};
//! use std::net::SocketAddr;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GatekeeperConfig::builder()
//!         .with_threshold(100)
//!         .with_window(Duration::from_secs(60))
//!         .build()
//!         .unwrap();
//!
//!     // In-memory stores by default; see `with_counter_store` for Redis
//!     let gatekeeper = Gatekeeper::builder(config).build().unwrap();
//!
//!     let app = Router::new()
//!         .route("/api/balance", get(|| async { "42" }))
//!         .merge(gatekeeper.reset_router())
//!         .layer(gatekeeper.layer());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! The layer needs the peer address, so serve with
//! `into_make_service_with_connect_info::<SocketAddr>()`. Without it every
//! request is attributed to the `unknown` client.
//!
//! ## How a Request Is Decided
//!
//! 1. Exempt paths (prefix `/dashboard` and the reset path by default) pass
//!    through without reading or writing any state.
//! 2. A banned client gets `403 {"error":"IP Blocked"}`.
//! 3. The client's window counter `rate:{ip}` is incremented; the first
//!    increment of a window arms the window as its TTL.
//! 4. A count above the threshold bans the client (`blocked:{ip}`), records a
//!    `Rate Limit Exceeded` alert and answers `429 {"error":"Too Many Requests"}`.
//! 5. Otherwise the request reaches the handler.
//!
//! The ban is written set-if-absent, so when many over-threshold requests
//! race only one of them creates the ban and emits the alert.
//!
//! ```rust
//! use request_gatekeeper::{LimitPolicy, WindowVerdict};
//! use std::time::Duration;
//!
//! let policy = LimitPolicy::new(3, Duration::from_secs(60)).unwrap();
//! assert_eq!(policy.evaluate(3), WindowVerdict::WithinBudget);
//! assert_eq!(policy.evaluate(4), WindowVerdict::Exceeded);
//! ```
//!
//! ## Store Failures
//!
//! Every store call is bounded by the store timeout (2 s by default). What
//! happens when the store cannot answer is configurable per call site:
//!
//! | Call | Default | Effect |
//! |------|---------|--------|
//! | Ban lookup | `FailMode::Closed` | `503 {"error":"Service Unavailable"}` |
//! | Window increment | `FailMode::Open` | request admitted uncounted |
//!
//! ```rust
//! use request_gatekeeper::{FailMode, FailurePolicy, GatekeeperConfig};
//!
//! let config = GatekeeperConfig::builder()
//!     .with_failure_policy(FailurePolicy {
//!         ban_check: FailMode::Closed,
//!         counter: FailMode::Closed,
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(config.failure_policy().counter, FailMode::Closed);
//! ```
//!
//! After repeated failures a circuit breaker opens and the failure policy is
//! applied without calling the store, until a trial call after the recovery
//! timeout succeeds.
//!
//! ## Configuration From the Environment
//!
//! `GatekeeperConfig::from_env()` reads `GATEKEEPER_WINDOW_SECS`,
//! `GATEKEEPER_THRESHOLD`, `GATEKEEPER_EXEMPT_PREFIXES`,
//! `GATEKEEPER_EXEMPT_PATHS`, `GATEKEEPER_RESET_PATH`,
//! `GATEKEEPER_STORE_TIMEOUT_MS`, `GATEKEEPER_BAN_SECS`,
//! `GATEKEEPER_TRUST_FORWARDED_FOR`, `GATEKEEPER_AUDIT_QUEUE`,
//! `GATEKEEPER_BAN_CHECK_FAIL` and `GATEKEEPER_COUNTER_FAIL`. Unset variables
//! keep their defaults.
//!
//! ## Observability
//!
//! ```rust,no_run
//! # use request_gatekeeper::{Gatekeeper, GatekeeperConfig};
//! # async fn run() {
//! # let gatekeeper = Gatekeeper::builder(GatekeeperConfig::default()).build().unwrap();
//! let snapshot = gatekeeper.metrics().snapshot();
//! println!("Throttled: {}", snapshot.requests_throttled);
//! println!("Dropped log records: {}", snapshot.logs_dropped);
//! println!("Rejection rate: {:.2}%", snapshot.rejection_rate() * 100.0);
//!
//! // Find bans whose alert write failed
//! for violation in gatekeeper.invariant_auditor().run().await.unwrap() {
//!     println!("{violation}");
//! }
//! # }
//! ```
//!
//! ## Shutdown
//!
//! Log records are written by a background task so responses never wait on
//! the record store. Call `Gatekeeper::shutdown` to write out the queued
//! records before exiting.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    client::ClientId,
    decision::GateDecision,
    exemption::ExemptPaths,
    invariant::InvariantViolation,
    policy::{FailMode, FailurePolicy, LimitPolicy, PolicyError, WindowVerdict},
    records::{AlertKind, AlertRecord, LogRecord, Severity},
};

pub use application::{
    alerts::AlertEmitter,
    audit::{AuditConfig, AuditConfigError, AuditHandle, AuditLogger, ShutdownError},
    bans::{BanOutcome, BanRegistry},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    config::{ConfigError, GatekeeperConfig, GatekeeperConfigBuilder},
    error::StoreError,
    invariants::InvariantAuditor,
    limiter::RateLimiter,
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, CounterStore, KeyExpiry, RecordStore},
    reset::ResetHook,
};

pub use infrastructure::{
    clock::SystemClock,
    gatekeeper::{BuildError, Gatekeeper, GatekeeperBuilder},
    http::{extract_client_id, reset_router, GatekeeperLayer, GatekeeperService},
    memory::{InMemoryCounterStore, InMemoryRecordStore},
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_storage::{
    RedisCounterStore, RedisCounterStoreConfig, RedisRecordStore, RedisRecordStoreConfig,
};
