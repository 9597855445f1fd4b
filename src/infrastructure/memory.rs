//! In-memory store adapters.
//!
//! Used by tests and by single-process deployments that do not need to share
//! counters. The counter store mirrors the Redis semantics the gate relies on:
//! atomic increments, per-key TTLs and set-if-absent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::application::error::StoreError;
use crate::application::ports::{Clock, CounterStore, KeyExpiry, RecordStore};
use crate::domain::client::ClientId;
use crate::domain::records::{AlertRecord, LogRecord};
use crate::infrastructure::clock::SystemClock;

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn persistent(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Default number of key creations between two sweeps of expired keys.
pub const DEFAULT_PURGE_EVERY: u64 = 1024;

/// Counter store backed by a sharded concurrent map.
///
/// DashMap locks per shard, so increments on one key are serialized while
/// different clients proceed in parallel. Expired keys are treated as absent.
/// Every `purge_every` key creations the whole map is swept, so windows of
/// clients that never return do not accumulate; `purge_expired` sweeps on
/// demand.
#[derive(Debug)]
pub struct InMemoryCounterStore {
    map: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
    purge_every: u64,
    created_since_purge: AtomicU64,
}

impl InMemoryCounterStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: DashMap::new(),
            clock,
            purge_every: DEFAULT_PURGE_EVERY,
            created_since_purge: AtomicU64::new(0),
        }
    }

    /// Sweep expired keys after every `creations` new keys. Zero is treated
    /// as one.
    pub fn with_purge_every(mut self, creations: u64) -> Self {
        self.purge_every = creations.max(1);
        self
    }

    /// Remove every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.map.len();
        self.map.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.map.len())
    }

    /// Number of stored keys, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Count one key creation and sweep when the cadence is reached.
    ///
    /// Must not be called while an entry guard is held: `retain` locks every
    /// shard.
    fn note_created(&self) {
        let created = self.created_since_purge.fetch_add(1, Ordering::Relaxed) + 1;
        if created >= self.purge_every {
            self.created_since_purge.store(0, Ordering::Relaxed);
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, remaining = self.map.len(), "purged expired counters");
            }
        }
    }

    fn bump(&self, key: &str, window: Option<Duration>) -> Result<i64, StoreError> {
        let now = self.clock.now();
        let fresh = || Slot {
            value: "1".to_string(),
            expires_at: window.map(|w| now + w),
        };

        match self.map.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh());
                    return Ok(1);
                }
                let slot = occupied.get_mut();
                let current: i64 = slot.value.parse().map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                })?;
                let next = current.saturating_add(1);
                slot.value = next.to_string();
                // Matches INCR on a key that lost its value: the new counter needs a TTL
                if next == 1 {
                    if let Some(w) = window {
                        slot.expires_at = Some(now + w);
                    }
                }
                return Ok(next);
            }
        }
        self.note_created();
        Ok(1)
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let expired = match self.map.get(key) {
            Some(slot) if !slot.is_expired(now) => return Ok(Some(slot.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.map.remove_if(key, |_, slot| slot.is_expired(now));
        }
        Ok(None)
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.bump(key, None)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        if let Some(mut slot) = self.map.get_mut(key) {
            if !slot.is_expired(now) {
                slot.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.map.insert(key.to_string(), Slot::persistent(value)).is_none() {
            self.note_created();
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let slot = Slot {
            value: value.to_string(),
            expires_at: ttl.map(|t| now + t),
        };

        match self.map.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(slot);
                    return Ok(true);
                }
                return Ok(false);
            }
        }
        self.note_created();
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<KeyExpiry, StoreError> {
        let now = self.clock.now();
        let expiry = match self.map.get(key) {
            None => KeyExpiry::Missing,
            Some(slot) => match slot.expires_at {
                None => KeyExpiry::Persistent,
                Some(at) if now >= at => KeyExpiry::Missing,
                Some(at) => KeyExpiry::ExpiresIn(at - now),
            },
        };
        Ok(expiry)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        Ok(self
            .map
            .iter()
            .filter(|entry| entry.key().starts_with(prefix) && !entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.map.clear();
        Ok(())
    }

    async fn increment_window(&self, key: &str, window: Duration) -> Result<i64, StoreError> {
        self.bump(key, Some(window))
    }
}

/// Record store holding logs and alerts in memory, oldest first.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    logs: RwLock<Vec<LogRecord>>,
    alerts: RwLock<Vec<AlertRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored log records.
    pub fn log_count(&self) -> usize {
        self.logs.read().len()
    }

    /// Number of stored alert records.
    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert_log(&self, record: LogRecord) -> Result<(), StoreError> {
        self.logs.write().push(record);
        Ok(())
    }

    async fn insert_alert(&self, record: AlertRecord) -> Result<(), StoreError> {
        self.alerts.write().push(record);
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        Ok(self.logs.read().iter().rev().take(limit).cloned().collect())
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self.alerts.read().iter().rev().take(limit).cloned().collect())
    }

    async fn alerts_for(&self, client: &ClientId) -> Result<Vec<AlertRecord>, StoreError> {
        Ok(self
            .alerts
            .read()
            .iter()
            .rev()
            .filter(|a| a.concerns(client))
            .cloned()
            .collect())
    }
}
