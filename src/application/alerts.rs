//! Security alert emission.
//!
//! Alerts are written synchronously inside the ban transition, so by the time
//! the offending client sees its 429 the alert is durable. A failed write is
//! logged and counted but never reaches the client.

use std::sync::Arc;
use std::time::Duration;

use crate::application::error::bounded;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, RecordStore};
use crate::domain::client::ClientId;
use crate::domain::records::{AlertKind, AlertRecord, Severity};

/// Writes alert records to the record store.
#[derive(Debug, Clone)]
pub struct AlertEmitter {
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    timeout: Duration,
}

impl AlertEmitter {
    pub fn new(
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        timeout: Duration,
    ) -> Self {
        Self {
            records,
            clock,
            metrics,
            timeout,
        }
    }

    /// Record one alert for `client`.
    ///
    /// Returns whether the alert was persisted.
    pub async fn emit(&self, client: &ClientId, kind: AlertKind, severity: Severity) -> bool {
        let record = AlertRecord::new(self.clock.utc_now(), client, kind, severity);

        match bounded(self.timeout, self.records.insert_alert(record)).await {
            Ok(()) => {
                tracing::warn!(
                    client = %client,
                    alert = %kind,
                    severity = %severity,
                    "security alert raised"
                );
                true
            }
            Err(e) => {
                self.metrics.record_alert_failure();
                tracing::error!(
                    error = %e,
                    client = %client,
                    alert = %kind,
                    "failed to persist security alert"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory::InMemoryRecordStore;
    use crate::infrastructure::mocks::{FaultyRecordStore, MockClock};

    #[tokio::test]
    async fn test_emit_persists_alert() {
        let records = Arc::new(InMemoryRecordStore::new());
        let clock = MockClock::new();
        let emitter = AlertEmitter::new(
            records.clone(),
            Arc::new(clock.clone()),
            Metrics::new(),
            Duration::from_secs(1),
        );
        let client = ClientId::new("9.9.9.9");

        assert!(
            emitter
                .emit(&client, AlertKind::RateLimitExceeded, Severity::High)
                .await
        );

        let alerts = records.recent_alerts(10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].ip, "9.9.9.9");
        assert_eq!(alerts[0].kind, AlertKind::RateLimitExceeded);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].timestamp, clock.utc_now());
    }

    #[tokio::test]
    async fn test_emit_failure_is_swallowed_and_counted() {
        let records = Arc::new(FaultyRecordStore::new());
        records.fail_writes(true);
        let metrics = Metrics::new();
        let emitter = AlertEmitter::new(
            records.clone(),
            Arc::new(MockClock::new()),
            metrics.clone(),
            Duration::from_secs(1),
        );

        let persisted = emitter
            .emit(
                &ClientId::new("1.2.3.4"),
                AlertKind::RateLimitExceeded,
                Severity::High,
            )
            .await;

        assert!(!persisted);
        assert_eq!(metrics.alerts_failed(), 1);
    }
}
