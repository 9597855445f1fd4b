//! Circuit breaker around the counter store.
//!
//! After enough consecutive store failures the breaker opens and the rate
//! limiter stops calling the store, applying its failure policy straight away
//! instead of waiting out a timeout on every request. Once the recovery
//! timeout has elapsed a single trial request is let through; its outcome
//! closes or reopens the circuit.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::application::ports::Clock;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Store calls proceed normally
    Closed = 0,
    /// Store calls are skipped and the failure policy applies
    Open = 1,
    /// One trial call is allowed to test recovery
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before probing the store again
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Lock-free circuit breaker shared by all request tasks.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_failure_nanos: AtomicU64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    /// Reference point for `last_failure_nanos`
    epoch: Instant,
}

impl CircuitBreaker {
    /// Create a circuit breaker reading time from `clock`.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_failure_nanos: AtomicU64::new(0),
            config,
            clock,
            epoch,
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether a store call should be attempted.
    ///
    /// Returns `false` while the circuit is open; the caller must then apply
    /// its failure policy without touching the store.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .clock
                    .now()
                    .saturating_duration_since(self.last_failure_time());
                if elapsed < self.config.recovery_timeout {
                    return false;
                }

                // Only one task wins the transition to half-open
                let transitioned = self
                    .state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                transitioned || self.state() == CircuitState::HalfOpen
            }
        }
    }

    /// Record a successful store call.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        if self.state() == CircuitState::HalfOpen {
            self.state
                .store(CircuitState::Closed as u8, Ordering::Release);
            tracing::info!("counter store recovered, circuit closed");
        }
    }

    /// Record a failed store call.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        let nanos = self
            .clock
            .now()
            .saturating_duration_since(self.epoch)
            .as_nanos()
            .try_into()
            .unwrap_or(u64::MAX);
        self.last_failure_nanos.store(nanos, Ordering::Release);

        match self.state() {
            CircuitState::HalfOpen => {
                self.state.store(CircuitState::Open as u8, Ordering::Release);
                tracing::warn!("counter store trial call failed, circuit reopened");
            }
            CircuitState::Closed if failures >= u64::from(self.config.failure_threshold) => {
                self.state.store(CircuitState::Open as u8, Ordering::Release);
                tracing::warn!(failures, "counter store failing, circuit opened");
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    fn last_failure_time(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.last_failure_nanos.load(Ordering::Acquire))
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Force the circuit closed, e.g. after an operator reset proved the
    /// store reachable.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }
}
