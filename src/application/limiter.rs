//! Rate limiter coordination logic.
//!
//! The rate limiter decides whether a request is admitted, throttled or
//! rejected. Per-client state lives entirely in the counter store, so several
//! processes sharing one store enforce one budget.

use std::sync::Arc;
use std::time::Duration;

use crate::application::alerts::AlertEmitter;
use crate::application::bans::{BanOutcome, BanRegistry};
use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::error::{bounded, StoreError};
use crate::application::metrics::Metrics;
use crate::application::ports::CounterStore;
use crate::domain::client::ClientId;
use crate::domain::decision::GateDecision;
use crate::domain::exemption::ExemptPaths;
use crate::domain::policy::{FailMode, FailurePolicy, LimitPolicy, WindowVerdict};
use crate::domain::records::{AlertKind, Severity};

/// Coordinates admission decisions.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    counters: Arc<dyn CounterStore>,
    bans: BanRegistry,
    alerts: AlertEmitter,
    exemptions: ExemptPaths,
    policy: LimitPolicy,
    failure: FailurePolicy,
    store_timeout: Duration,
    metrics: Metrics,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `counters` - Shared counter store holding windows and bans
    /// * `alerts` - Emitter invoked on each ban transition
    /// * `exemptions` - Paths that bypass the gate entirely
    /// * `policy` - Threshold, window and ban lifetime
    /// * `failure` - What to do when the store cannot answer
    /// * `store_timeout` - Upper bound on each store call
    /// * `metrics` - Metrics tracker
    /// * `circuit_breaker` - Breaker guarding the counter store
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        counters: Arc<dyn CounterStore>,
        alerts: AlertEmitter,
        exemptions: ExemptPaths,
        policy: LimitPolicy,
        failure: FailurePolicy,
        store_timeout: Duration,
        metrics: Metrics,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let bans = BanRegistry::new(counters.clone(), store_timeout);
        Self {
            counters,
            bans,
            alerts,
            exemptions,
            policy,
            failure,
            store_timeout,
            metrics,
            circuit_breaker,
        }
    }

    /// Decide whether a request from `client` to `path` may proceed.
    ///
    /// # Fail-Safe Behavior
    /// Store failures never propagate. A failed ban lookup applies
    /// `FailurePolicy::ban_check`, a failed increment applies
    /// `FailurePolicy::counter`. While the circuit breaker is open the store
    /// is not called at all and both modes apply in order.
    pub async fn check(&self, client: &ClientId, path: &str) -> GateDecision {
        let decision = self.decide(client, path).await;
        self.metrics.record_decision(&decision);
        decision
    }

    async fn decide(&self, client: &ClientId, path: &str) -> GateDecision {
        if self.exemptions.is_exempt(path) {
            tracing::trace!(client = %client, path, "exempt path");
            return GateDecision::Exempt;
        }

        if !self.circuit_breaker.allow_request() {
            tracing::debug!(client = %client, path, "circuit open, skipping counter store");
            return match self.failure.ban_check {
                FailMode::Closed => GateDecision::Unavailable,
                FailMode::Open => self.counter_failed(client),
            };
        }

        match self.observe(self.bans.is_banned(client).await) {
            Ok(true) => {
                tracing::warn!(client = %client, path, "rejecting banned client");
                return GateDecision::Blocked;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, client = %client, "ban lookup failed");
                return match self.failure.ban_check {
                    FailMode::Closed => GateDecision::Unavailable,
                    FailMode::Open => self.count(client, path).await,
                };
            }
        }

        self.count(client, path).await
    }

    async fn count(&self, client: &ClientId, path: &str) -> GateDecision {
        let key = client.rate_key();
        let result = bounded(
            self.store_timeout,
            self.counters.increment_window(&key, self.policy.window()),
        )
        .await;

        let count = match self.observe(result) {
            // A negative count can only come from a foreign writer; treat as fresh
            Ok(n) => u64::try_from(n).unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, client = %client, "window increment failed");
                return self.counter_failed(client);
            }
        };

        match self.policy.evaluate(count) {
            WindowVerdict::WithinBudget => {
                tracing::debug!(client = %client, path, count, "request admitted");
                GateDecision::Allow { count: Some(count) }
            }
            WindowVerdict::Exceeded => {
                self.ban(client, count).await;
                GateDecision::TooManyRequests { count }
            }
        }
    }

    async fn ban(&self, client: &ClientId, count: u64) {
        let outcome = self.bans.ban(client, self.policy.ban_duration()).await;
        match self.observe(outcome) {
            Ok(BanOutcome::Created) => {
                self.metrics.record_ban();
                tracing::warn!(
                    client = %client,
                    count,
                    threshold = self.policy.threshold(),
                    "rate limit exceeded, client banned"
                );
                self.alerts
                    .emit(client, AlertKind::RateLimitExceeded, Severity::High)
                    .await;
            }
            Ok(BanOutcome::AlreadyBanned) => {
                tracing::debug!(client = %client, count, "client already banned");
            }
            Err(e) => {
                tracing::error!(error = %e, client = %client, count, "failed to record ban");
            }
        }
    }

    fn counter_failed(&self, client: &ClientId) -> GateDecision {
        match self.failure.counter {
            FailMode::Open => {
                tracing::debug!(client = %client, "admitting without counting");
                GateDecision::Allow { count: None }
            }
            FailMode::Closed => GateDecision::Unavailable,
        }
    }

    /// Feed a store outcome to the circuit breaker and metrics.
    fn observe<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        match &result {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(e) => {
                self.metrics.record_store_failure();
                if e.is_unavailable() {
                    self.circuit_breaker.record_failure();
                }
            }
        }
        result
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a reference to the circuit breaker.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Get a reference to the ban registry.
    pub fn bans(&self) -> &BanRegistry {
        &self.bans
    }

    /// Get the active limit policy.
    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }
}
