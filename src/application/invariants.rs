//! Offline audit of store state.
//!
//! Two invariants cannot be enforced on the request path: a ban without an
//! alert (the alert write failed after the ban was stored) and a window
//! counter without a TTL (TTL arming failed after the increment, possible
//! only with an adapter that lacks an atomic `increment_window`). The auditor
//! scans the stores and reports both.
//!
//! Bans are bare markers with no timestamp, and a reset clears bans while
//! keeping the alert history. A client that was banned, reset and banned
//! again therefore passes the ban check on the strength of its first alert,
//! even if the alert for the second ban was lost. The check only proves that
//! a banned client was alerted on at least once.

use std::sync::Arc;
use std::time::Duration;

use crate::application::error::{bounded, StoreError};
use crate::application::ports::{CounterStore, KeyExpiry, RecordStore};
use crate::domain::client::{ClientId, BLOCKED_KEY_PREFIX, RATE_KEY_PREFIX};
use crate::domain::invariant::InvariantViolation;

/// Scans counter and record stores for broken invariants.
#[derive(Debug, Clone)]
pub struct InvariantAuditor {
    counters: Arc<dyn CounterStore>,
    records: Arc<dyn RecordStore>,
    timeout: Duration,
}

impl InvariantAuditor {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        records: Arc<dyn RecordStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            counters,
            records,
            timeout,
        }
    }

    /// Collect every violation currently present.
    ///
    /// A ban counts as alerted if any alert exists for the client, including
    /// one recorded before the last reset.
    ///
    /// # Errors
    /// Returns `StoreError` if either store cannot be read.
    pub async fn run(&self) -> Result<Vec<InvariantViolation>, StoreError> {
        let mut violations = Vec::new();

        for key in bounded(self.timeout, self.counters.keys(BLOCKED_KEY_PREFIX)).await? {
            let Some(client) = ClientId::from_key(&key) else {
                continue;
            };
            let alerts = bounded(self.timeout, self.records.alerts_for(&client)).await?;
            if alerts.is_empty() {
                violations.push(InvariantViolation::BanWithoutAlert { client });
            }
        }

        for key in bounded(self.timeout, self.counters.keys(RATE_KEY_PREFIX)).await? {
            let Some(client) = ClientId::from_key(&key) else {
                continue;
            };
            if bounded(self.timeout, self.counters.ttl(&key)).await? == KeyExpiry::Persistent {
                violations.push(InvariantViolation::CounterWithoutExpiry { client });
            }
        }

        for violation in &violations {
            tracing::warn!(client = %violation.client(), "{violation}");
        }
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::records::{AlertKind, AlertRecord, Severity};
    use crate::infrastructure::memory::{InMemoryCounterStore, InMemoryRecordStore};
    use chrono::Utc;

    fn auditor() -> (InvariantAuditor, Arc<InMemoryCounterStore>, Arc<InMemoryRecordStore>) {
        let counters = Arc::new(InMemoryCounterStore::new());
        let records = Arc::new(InMemoryRecordStore::new());
        let auditor = InvariantAuditor::new(counters.clone(), records.clone(), Duration::from_secs(1));
        (auditor, counters, records)
    }

    #[tokio::test]
    async fn test_clean_state_has_no_violations() {
        let (auditor, counters, records) = auditor();
        let client = ClientId::new("9.9.9.9");
        counters
            .increment_window(&client.rate_key(), Duration::from_secs(60))
            .await
            .unwrap();
        counters.set(&client.blocked_key(), "true").await.unwrap();
        records
            .insert_alert(AlertRecord::new(
                Utc::now(),
                &client,
                AlertKind::RateLimitExceeded,
                Severity::High,
            ))
            .await
            .unwrap();

        assert!(auditor.run().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ban_without_alert_is_reported() {
        let (auditor, counters, _) = auditor();
        counters.set("blocked:6.6.6.6", "true").await.unwrap();

        let violations = auditor.run().await.unwrap();
        assert_eq!(
            violations,
            vec![InvariantViolation::BanWithoutAlert {
                client: ClientId::new("6.6.6.6")
            }]
        );
    }

    #[tokio::test]
    async fn test_alert_from_before_reset_satisfies_ban_check() {
        let (auditor, counters, records) = auditor();
        let client = ClientId::new("7.7.7.7");

        counters.set(&client.blocked_key(), "true").await.unwrap();
        records
            .insert_alert(AlertRecord::new(
                Utc::now(),
                &client,
                AlertKind::RateLimitExceeded,
                Severity::High,
            ))
            .await
            .unwrap();

        // Reset keeps the alert, then a second ban loses its alert write
        counters.delete_all().await.unwrap();
        counters.set(&client.blocked_key(), "true").await.unwrap();

        assert!(auditor.run().await.unwrap().is_empty());
        assert_eq!(records.alerts_for(&client).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_counter_without_expiry_is_reported() {
        let (auditor, counters, _) = auditor();
        // A bare increment never arms a TTL
        counters.increment("rate:5.5.5.5").await.unwrap();

        let violations = auditor.run().await.unwrap();
        assert_eq!(
            violations,
            vec![InvariantViolation::CounterWithoutExpiry {
                client: ClientId::new("5.5.5.5")
            }]
        );
    }
}
