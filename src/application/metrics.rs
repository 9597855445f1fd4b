//! Observability metrics for the gate.
//!
//! Counts every admission outcome and every failed side effect, so operators
//! can see both abuse and store trouble without reading the audit log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::domain::decision::GateDecision;

/// Metrics tracking gate statistics.
///
/// Cheap to clone; all clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    requests_exempt: AtomicU64,
    requests_allowed: AtomicU64,
    requests_blocked: AtomicU64,
    requests_throttled: AtomicU64,
    requests_unavailable: AtomicU64,
    bans_issued: AtomicU64,
    alerts_failed: AtomicU64,
    logs_written: AtomicU64,
    logs_dropped: AtomicU64,
    logs_failed: AtomicU64,
    store_failures: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one admission check.
    pub(crate) fn record_decision(&self, decision: &GateDecision) {
        let counter = match decision {
            GateDecision::Exempt => &self.inner.requests_exempt,
            GateDecision::Allow { .. } => &self.inner.requests_allowed,
            GateDecision::Blocked => &self.inner.requests_blocked,
            GateDecision::TooManyRequests { .. } => &self.inner.requests_throttled,
            GateDecision::Unavailable => &self.inner.requests_unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ban(&self) {
        self.inner.bans_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_alert_failure(&self) {
        self.inner.alerts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_log_written(&self) {
        self.inner.logs_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_log_dropped(&self) {
        self.inner.logs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_log_failure(&self) {
        self.inner.logs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store_failure(&self) {
        self.inner.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_exempt(&self) -> u64 {
        self.inner.requests_exempt.load(Ordering::Relaxed)
    }

    pub fn requests_allowed(&self) -> u64 {
        self.inner.requests_allowed.load(Ordering::Relaxed)
    }

    pub fn requests_blocked(&self) -> u64 {
        self.inner.requests_blocked.load(Ordering::Relaxed)
    }

    pub fn requests_throttled(&self) -> u64 {
        self.inner.requests_throttled.load(Ordering::Relaxed)
    }

    pub fn requests_unavailable(&self) -> u64 {
        self.inner.requests_unavailable.load(Ordering::Relaxed)
    }

    pub fn bans_issued(&self) -> u64 {
        self.inner.bans_issued.load(Ordering::Relaxed)
    }

    pub fn alerts_failed(&self) -> u64 {
        self.inner.alerts_failed.load(Ordering::Relaxed)
    }

    pub fn logs_written(&self) -> u64 {
        self.inner.logs_written.load(Ordering::Relaxed)
    }

    pub fn logs_dropped(&self) -> u64 {
        self.inner.logs_dropped.load(Ordering::Relaxed)
    }

    pub fn logs_failed(&self) -> u64 {
        self.inner.logs_failed.load(Ordering::Relaxed)
    }

    pub fn store_failures(&self) -> u64 {
        self.inner.store_failures.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_exempt: self.requests_exempt(),
            requests_allowed: self.requests_allowed(),
            requests_blocked: self.requests_blocked(),
            requests_throttled: self.requests_throttled(),
            requests_unavailable: self.requests_unavailable(),
            bans_issued: self.bans_issued(),
            alerts_failed: self.alerts_failed(),
            logs_written: self.logs_written(),
            logs_dropped: self.logs_dropped(),
            logs_failed: self.logs_failed(),
            store_failures: self.store_failures(),
        }
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub requests_exempt: u64,
    pub requests_allowed: u64,
    pub requests_blocked: u64,
    pub requests_throttled: u64,
    pub requests_unavailable: u64,
    pub bans_issued: u64,
    pub alerts_failed: u64,
    pub logs_written: u64,
    pub logs_dropped: u64,
    pub logs_failed: u64,
    pub store_failures: u64,
}

impl MetricsSnapshot {
    /// Total requests seen by the gate, exempt ones included.
    pub fn total_requests(&self) -> u64 {
        self.requests_exempt
            .saturating_add(self.requests_allowed)
            .saturating_add(self.rejected_requests())
    }

    /// Requests answered by the gate itself (403, 429 or 503).
    pub fn rejected_requests(&self) -> u64 {
        self.requests_blocked
            .saturating_add(self.requests_throttled)
            .saturating_add(self.requests_unavailable)
    }

    /// Fraction of requests rejected by the gate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been seen.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.rejected_requests() as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_at_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
        assert_eq!(metrics.snapshot().rejection_rate(), 0.0);
    }

    #[test]
    fn test_decisions_land_in_their_counters() {
        let metrics = Metrics::new();
        metrics.record_decision(&GateDecision::Exempt);
        metrics.record_decision(&GateDecision::Allow { count: Some(1) });
        metrics.record_decision(&GateDecision::Allow { count: None });
        metrics.record_decision(&GateDecision::Blocked);
        metrics.record_decision(&GateDecision::TooManyRequests { count: 4 });
        metrics.record_decision(&GateDecision::Unavailable);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_exempt, 1);
        assert_eq!(snapshot.requests_allowed, 2);
        assert_eq!(snapshot.requests_blocked, 1);
        assert_eq!(snapshot.requests_throttled, 1);
        assert_eq!(snapshot.requests_unavailable, 1);
        assert_eq!(snapshot.total_requests(), 6);
        assert_eq!(snapshot.rejected_requests(), 3);
        assert!((snapshot.rejection_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_ban();
        clone.record_log_dropped();
        clone.record_store_failure();

        assert_eq!(metrics.bans_issued(), 1);
        assert_eq!(metrics.logs_dropped(), 1);
        assert_eq!(metrics.store_failures(), 1);
    }
}
