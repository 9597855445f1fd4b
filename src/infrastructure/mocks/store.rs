//! Store doubles with switchable failures.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::error::StoreError;
use crate::application::ports::{CounterStore, KeyExpiry, RecordStore};
use crate::domain::client::ClientId;
use crate::domain::records::{AlertRecord, LogRecord};
use crate::infrastructure::memory::{InMemoryCounterStore, InMemoryRecordStore};

fn refused() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

/// Counter store wrapping `InMemoryCounterStore` whose calls can be made to
/// fail or stall.
///
/// Reads are `get`, `ttl` and `keys`; increments are `increment`,
/// `increment_window` and `expire`; writes are `set`, `set_if_absent` and
/// `delete_all`.
#[derive(Debug, Default)]
pub struct FaultyCounterStore {
    inner: InMemoryCounterStore,
    fail_reads: AtomicBool,
    fail_increments: AtomicBool,
    fail_writes: AtomicBool,
    fail_delete_all: AtomicBool,
    stall: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl FaultyCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing store, e.g. one driven by a `MockClock`.
    pub fn wrapping(inner: InMemoryCounterStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_increments(&self, fail: bool) {
        self.fail_increments.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only `delete_all`, e.g. a read-only replica that still serves
    /// the gate.
    pub fn fail_delete_all(&self, fail: bool) {
        self.fail_delete_all.store(fail, Ordering::SeqCst);
    }

    /// Toggle failure of every call.
    pub fn fail_all(&self, fail: bool) {
        self.fail_reads(fail);
        self.fail_increments(fail);
        self.fail_writes(fail);
    }

    /// Delay every call by `delay` before it runs.
    pub fn stall(&self, delay: Duration) {
        *self.stall.lock() = Some(delay);
    }

    /// Number of calls received, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryCounterStore {
        &self.inner
    }

    async fn enter(&self, flag: &AtomicBool) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.stall.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if flag.load(Ordering::SeqCst) {
            return Err(refused());
        }
        Ok(())
    }
}

#[async_trait]
impl CounterStore for FaultyCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.enter(&self.fail_reads).await?;
        self.inner.get(key).await
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.enter(&self.fail_increments).await?;
        self.inner.increment(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.enter(&self.fail_increments).await?;
        self.inner.expire(key, ttl).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.enter(&self.fail_writes).await?;
        self.inner.set(key, value).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.enter(&self.fail_writes).await?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyExpiry, StoreError> {
        self.enter(&self.fail_reads).await?;
        self.inner.ttl(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.enter(&self.fail_reads).await?;
        self.inner.keys(prefix).await
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.enter(&self.fail_writes).await?;
        if self.fail_delete_all.load(Ordering::SeqCst) {
            return Err(refused());
        }
        self.inner.delete_all().await
    }

    async fn increment_window(&self, key: &str, window: Duration) -> Result<i64, StoreError> {
        self.enter(&self.fail_increments).await?;
        self.inner.increment_window(key, window).await
    }
}

/// Record store wrapping `InMemoryRecordStore` whose calls can be made to
/// fail or stall.
#[derive(Debug, Default)]
pub struct FaultyRecordStore {
    inner: InMemoryRecordStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    stall_writes: Mutex<Option<Duration>>,
}

impl FaultyRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every insert by `delay`.
    pub fn stall_writes(&self, delay: Duration) {
        *self.stall_writes.lock() = Some(delay);
    }

    pub fn inner(&self) -> &InMemoryRecordStore {
        &self.inner
    }

    async fn enter_write(&self) -> Result<(), StoreError> {
        let delay = *self.stall_writes.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(refused());
        }
        Ok(())
    }

    fn enter_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(refused());
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FaultyRecordStore {
    async fn insert_log(&self, record: LogRecord) -> Result<(), StoreError> {
        self.enter_write().await?;
        self.inner.insert_log(record).await
    }

    async fn insert_alert(&self, record: AlertRecord) -> Result<(), StoreError> {
        self.enter_write().await?;
        self.inner.insert_alert(record).await
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        self.enter_read()?;
        self.inner.recent_logs(limit).await
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        self.enter_read()?;
        self.inner.recent_alerts(limit).await
    }

    async fn alerts_for(&self, client: &ClientId) -> Result<Vec<AlertRecord>, StoreError> {
        self.enter_read()?;
        self.inner.alerts_for(client).await
    }
}
