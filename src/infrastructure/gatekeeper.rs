//! Gatekeeper facade.
//!
//! Wires the stores, clock, rate limiter, alert emitter, audit logger and
//! reset hook from one `GatekeeperConfig`, and owns the audit worker's
//! lifetime.

use std::sync::Arc;

use axum::Router;
use thiserror::Error;

use crate::application::alerts::AlertEmitter;
use crate::application::audit::{AuditHandle, AuditLogger, ShutdownError};
use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::config::GatekeeperConfig;
use crate::application::invariants::InvariantAuditor;
use crate::application::limiter::RateLimiter;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, CounterStore, RecordStore};
use crate::application::reset::ResetHook;
use crate::domain::client::ClientId;
use crate::domain::decision::GateDecision;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::http::{self, GatekeeperLayer};
use crate::infrastructure::memory::{InMemoryCounterStore, InMemoryRecordStore};

/// Error returned when the gatekeeper cannot be assembled.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The audit worker needs a tokio runtime to be spawned on
    #[error("Gatekeeper::build must be called from within a tokio runtime")]
    NoRuntime,
}

/// Builder for constructing a `Gatekeeper`.
///
/// Stores left unset default to the in-memory adapters, which suits a single
/// process. Several processes sharing one budget need shared stores.
#[derive(Debug)]
pub struct GatekeeperBuilder {
    config: GatekeeperConfig,
    counters: Option<Arc<dyn CounterStore>>,
    records: Option<Arc<dyn RecordStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl GatekeeperBuilder {
    /// Set the counter store holding windows and bans.
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counters = Some(store);
        self
    }

    /// Set the record store receiving logs and alerts.
    pub fn with_record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.records = Some(store);
        self
    }

    /// Set a custom clock (useful for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the gatekeeper and start its audit worker.
    ///
    /// # Errors
    /// Returns `BuildError::NoRuntime` outside a tokio runtime.
    pub fn build(self) -> Result<Gatekeeper, BuildError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(BuildError::NoRuntime);
        }

        let config = self.config;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let counters = self
            .counters
            .unwrap_or_else(|| Arc::new(InMemoryCounterStore::with_clock(clock.clone())));
        let records = self
            .records
            .unwrap_or_else(|| Arc::new(InMemoryRecordStore::new()));

        let metrics = Metrics::new();
        let circuit_breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker(), clock.clone()));
        let alerts = AlertEmitter::new(
            records.clone(),
            clock.clone(),
            metrics.clone(),
            config.store_timeout(),
        );
        let limiter = RateLimiter::new(
            counters.clone(),
            alerts,
            config.exemptions().clone(),
            *config.policy(),
            config.failure_policy(),
            config.store_timeout(),
            metrics.clone(),
            circuit_breaker.clone(),
        );
        let (audit, audit_handle) =
            AuditLogger::start(records.clone(), clock, metrics.clone(), config.audit());
        let reset = Arc::new(ResetHook::new(
            counters.clone(),
            circuit_breaker,
            config.store_timeout(),
        ));

        tracing::info!(
            threshold = config.policy().threshold(),
            window_secs = config.policy().window().as_secs(),
            reset_path = config.reset_path(),
            "gatekeeper started"
        );

        Ok(Gatekeeper {
            config,
            counters,
            records,
            limiter,
            audit,
            audit_handle,
            reset,
            metrics,
        })
    }
}

/// Assembled gatekeeping pipeline.
#[derive(Debug)]
pub struct Gatekeeper {
    config: GatekeeperConfig,
    counters: Arc<dyn CounterStore>,
    records: Arc<dyn RecordStore>,
    limiter: RateLimiter,
    audit: AuditLogger,
    audit_handle: AuditHandle,
    reset: Arc<ResetHook>,
    metrics: Metrics,
}

impl Gatekeeper {
    /// Create a builder for `config`.
    pub fn builder(config: GatekeeperConfig) -> GatekeeperBuilder {
        GatekeeperBuilder {
            config,
            counters: None,
            records: None,
            clock: None,
        }
    }

    /// Decide on one request without going through HTTP.
    pub async fn check(&self, client: &ClientId, path: &str) -> GateDecision {
        self.limiter.check(client, path).await
    }

    /// Tower layer enforcing the gate on a router.
    pub fn layer(&self) -> GatekeeperLayer {
        GatekeeperLayer::new(
            self.limiter.clone(),
            self.audit.clone(),
            self.config.trust_forwarded_for(),
        )
    }

    /// Router serving the reset hook on the configured reset path.
    pub fn reset_router(&self) -> Router {
        http::reset_router(self.reset.clone(), self.config.reset_path())
    }

    pub fn reset_hook(&self) -> Arc<ResetHook> {
        self.reset.clone()
    }

    /// Audit logger for requests that bypass the layer.
    pub fn audit_logger(&self) -> &AuditLogger {
        &self.audit
    }

    /// Auditor over this gatekeeper's stores.
    pub fn invariant_auditor(&self) -> InvariantAuditor {
        InvariantAuditor::new(
            self.counters.clone(),
            self.records.clone(),
            self.config.store_timeout(),
        )
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &GatekeeperConfig {
        &self.config
    }

    /// Record store, e.g. for a dashboard reading recent logs and alerts.
    pub fn records(&self) -> Arc<dyn RecordStore> {
        self.records.clone()
    }

    pub fn counters(&self) -> Arc<dyn CounterStore> {
        self.counters.clone()
    }

    /// Stop the audit worker after it has written every queued record.
    ///
    /// Layers created from this gatekeeper keep answering requests afterwards,
    /// but their log records are dropped.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the worker panicked or was cancelled.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        let result = self.audit_handle.shutdown().await;
        tracing::info!(metrics = ?self.metrics.snapshot(), "gatekeeper stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::time::Duration;

    fn config(threshold: u64) -> GatekeeperConfig {
        GatekeeperConfig::builder()
            .with_threshold(threshold)
            .with_window(Duration::from_secs(60))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = Gatekeeper::builder(config(3)).build();
        assert!(matches!(result, Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_defaults_to_in_memory_stores() {
        let gatekeeper = Gatekeeper::builder(config(1)).build().unwrap();
        let client = ClientId::new("9.9.9.9");

        assert!(gatekeeper.check(&client, "/").await.is_admitted());
        assert_eq!(
            gatekeeper.check(&client, "/").await,
            GateDecision::TooManyRequests { count: 2 }
        );
        assert_eq!(gatekeeper.records().recent_alerts(10).await.unwrap().len(), 1);
        assert!(gatekeeper.invariant_auditor().run().await.unwrap().is_empty());

        gatekeeper.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_hook_shares_counter_store() {
        let clock = MockClock::new();
        let gatekeeper = Gatekeeper::builder(config(1))
            .with_clock(Arc::new(clock))
            .build()
            .unwrap();
        let client = ClientId::new("1.1.1.1");

        gatekeeper.check(&client, "/").await;
        gatekeeper.check(&client, "/").await;
        assert_eq!(gatekeeper.check(&client, "/").await, GateDecision::Blocked);

        gatekeeper.reset_hook().reset_all().await.unwrap();
        assert_eq!(
            gatekeeper.check(&client, "/").await,
            GateDecision::Allow { count: Some(1) }
        );
        gatekeeper.shutdown().await.unwrap();
    }
}
