//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports: in-memory
//! stores for tests and single-node use, Redis stores for shared deployments.

use std::fmt::Debug;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::application::error::StoreError;
use crate::domain::client::ClientId;
use crate::domain::records::{AlertRecord, LogRecord};

/// Port for obtaining current time.
///
/// `now` drives TTL bookkeeping and the circuit breaker; `utc_now` stamps
/// persisted records. Infrastructure provides `SystemClock` and, for tests,
/// `MockClock`.
pub trait Clock: Send + Sync + Debug {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current wall-clock time.
    fn utc_now(&self) -> DateTime<Utc>;
}

/// Expiry state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExpiry {
    /// The key does not exist
    Missing,
    /// The key exists and never expires
    Persistent,
    /// The key expires after the given duration
    ExpiresIn(Duration),
}

/// Port for the shared key-value counter store.
///
/// Every call is a potential network round trip and may fail with
/// `StoreError`; callers decide whether to fail open or closed.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Get the value at `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically increment the integer at `key`, creating it at 1 if absent.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Set or refresh the TTL of `key`.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Set `key` to `value` with no TTL.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Set `key` to `value` only if it does not exist, optionally with a TTL.
    ///
    /// Returns `true` when this call created the key.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Report whether and when `key` expires.
    async fn ttl(&self, key: &str) -> Result<KeyExpiry, StoreError>;

    /// List live keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove every key owned by this store.
    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Increment the window counter at `key`, arming `window` as its TTL when
    /// the counter is created (the returned count is 1).
    ///
    /// The default composes `increment` and `expire` and is not atomic: if the
    /// process or the store fails between the two calls, the counter is left
    /// without a TTL and the window never resets. Adapters should override it
    /// with a single atomic operation; both shipped adapters do.
    async fn increment_window(&self, key: &str, window: Duration) -> Result<i64, StoreError> {
        let count = self.increment(key).await?;
        if count == 1 {
            self.expire(key, window).await?;
        }
        Ok(count)
    }
}

/// Port for the append-only document store holding logs and alerts.
#[async_trait]
pub trait RecordStore: Send + Sync + Debug {
    /// Persist one log record.
    async fn insert_log(&self, record: LogRecord) -> Result<(), StoreError>;

    /// Persist one alert record.
    async fn insert_alert(&self, record: AlertRecord) -> Result<(), StoreError>;

    /// Up to `limit` log records, newest first.
    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError>;

    /// Up to `limit` alert records, newest first.
    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError>;

    /// Every alert recorded for `client`, newest first.
    async fn alerts_for(&self, client: &ClientId) -> Result<Vec<AlertRecord>, StoreError>;
}
