//! Redis-backed store adapters.
//!
//! Provides the shared counter store and record store used when several
//! application instances must enforce one budget and write one audit trail.
//!
//! ## Architecture
//!
//! Counters and bans use a plain key-value model under a configurable prefix:
//! - `{prefix}rate:{client}`: integer window count, `PEXPIRE` armed on creation
//! - `{prefix}blocked:{client}`: ban sentinel, written with `SET NX [PX]`
//!
//! Records are JSON documents in two lists under a separate prefix, newest at
//! the head (`LPUSH` + `LRANGE`), so resetting counters never touches the
//! audit trail.
//!
//! ## Features
//!
//! - Atomic window increment: one Lua script does `INCR` and arms the TTL when
//!   the count is 1, so a crash cannot leave a counter without expiry
//! - Connection multiplexing via `redis::aio::ConnectionManager`, which also
//!   reconnects after a dropped connection
//! - Prefix-scoped reset: `delete_all` walks `SCAN MATCH {prefix}*` instead of
//!   flushing the database
//!
//! ## Example
//!
//! ```rust,ignore
//! use request_gatekeeper::{Gatekeeper, GatekeeperConfig, RedisCounterStore, RedisRecordStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let counters = RedisCounterStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!     let records = RedisRecordStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let gatekeeper = Gatekeeper::builder(GatekeeperConfig::from_env().unwrap())
//!         .with_counter_store(Arc::new(counters))
//!         .with_record_store(Arc::new(records))
//!         .build()
//!         .unwrap();
//! }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError, Script};

use crate::application::error::StoreError;
use crate::application::ports::{CounterStore, KeyExpiry, RecordStore};
use crate::domain::client::ClientId;
use crate::domain::records::{AlertRecord, LogRecord};

/// Increments `KEYS[1]` and arms `ARGV[1]` milliseconds of TTL when the
/// counter was just created.
const INCREMENT_WINDOW_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

const SCAN_BATCH: usize = 100;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Translate a `PTTL` reply.
fn expiry_from_pttl(pttl: i64) -> KeyExpiry {
    match pttl {
        -1 => KeyExpiry::Persistent,
        ms if ms < 0 => KeyExpiry::Missing,
        ms => KeyExpiry::ExpiresIn(Duration::from_millis(ms.unsigned_abs())),
    }
}

fn increment_error(key: &str, e: RedisError) -> StoreError {
    if e.to_string().contains("not an integer") {
        StoreError::NotAnInteger {
            key: key.to_string(),
        }
    } else {
        StoreError::from(e)
    }
}

/// Characters with meaning in a `SCAN MATCH` pattern.
const GLOB_CHARS: [char; 5] = ['*', '?', '[', ']', '\\'];

/// Reject prefixes that would widen a `{prefix}*` scan beyond this store.
fn validate_prefix(prefix: &str) -> Result<(), RedisError> {
    if prefix.is_empty() {
        return Err(RedisError::from((
            ErrorKind::InvalidClientConfig,
            "key prefix must not be empty",
        )));
    }
    if let Some(c) = prefix.chars().find(|c| GLOB_CHARS.contains(c)) {
        return Err(RedisError::from((
            ErrorKind::InvalidClientConfig,
            "key prefix contains a glob character",
            format!("{c:?} in {prefix:?}"),
        )));
    }
    Ok(())
}

/// Collect every key matching `pattern` via `SCAN`.
async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<String>, StoreError> {
    let mut found = Vec::new();
    let mut cursor: u64 = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(conn)
            .await?;
        found.extend(keys);
        if next == 0 {
            return Ok(found);
        }
        cursor = next;
    }
}

/// Configuration for the Redis counter store.
///
/// `delete_all` removes every key under `key_prefix`, so the prefix must be
/// non-empty, free of glob characters and not a prefix of the record store's.
#[derive(Debug, Clone)]
pub struct RedisCounterStoreConfig {
    /// Key prefix for Redis keys (default: "gatekeeper:")
    pub key_prefix: String,
}

impl RedisCounterStoreConfig {
    /// Check the prefix before any key is built from it.
    ///
    /// # Errors
    /// Returns an `InvalidClientConfig` error for an empty prefix or one
    /// containing `*`, `?`, `[`, `]` or `\`.
    pub fn validate(&self) -> Result<(), RedisError> {
        validate_prefix(&self.key_prefix)
    }
}

impl Default for RedisCounterStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "gatekeeper:".to_string(),
        }
    }
}

/// Redis-backed counter store shared by every instance of the service.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    config: RedisCounterStoreConfig,
    increment_window: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisCounterStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if the key prefix is invalid or the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisCounterStoreConfig,
    ) -> Result<Self, RedisError> {
        config.validate()?;
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Self::from_connection(connection, config)
    }

    /// Build a store on an existing connection.
    ///
    /// # Errors
    /// Returns error if the key prefix is invalid.
    pub fn from_connection(
        connection: ConnectionManager,
        config: RedisCounterStoreConfig,
    ) -> Result<Self, RedisError> {
        config.validate()?;
        Ok(Self {
            connection,
            config,
            increment_window: Script::new(INCREMENT_WINDOW_SCRIPT),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    // ConnectionManager clones share one multiplexed connection
    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self.conn().get(self.key(key)).await?;
        Ok(value)
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let count: i64 = self
            .conn()
            .incr(self.key(key), 1i64)
            .await
            .map_err(|e| increment_error(key, e))?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(self.key(key))
            .arg(millis(ttl))
            .query_async(&mut self.conn())
            .await?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: () = self.conn().set(self.key(key), value).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut self.conn()).await?;
        Ok(reply.is_some())
    }

    async fn ttl(&self, key: &str) -> Result<KeyExpiry, StoreError> {
        let pttl: i64 = redis::cmd("PTTL")
            .arg(self.key(key))
            .query_async(&mut self.conn())
            .await?;
        Ok(expiry_from_pttl(pttl))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}{}*", self.config.key_prefix, prefix);
        let keys = scan_keys(&mut self.conn(), &pattern).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.config.key_prefix).map(str::to_string))
            .collect())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let pattern = format!("{}*", self.config.key_prefix);
        let keys = scan_keys(&mut conn, &pattern).await?;

        for batch in keys.chunks(SCAN_BATCH) {
            let _: i64 = conn.del(batch).await?;
        }
        tracing::debug!(deleted = keys.len(), prefix = %self.config.key_prefix, "cleared redis keys");
        Ok(())
    }

    async fn increment_window(&self, key: &str, window: Duration) -> Result<i64, StoreError> {
        let count: i64 = self
            .increment_window
            .key(self.key(key))
            .arg(millis(window))
            .invoke_async(&mut self.conn())
            .await
            .map_err(|e| increment_error(key, e))?;
        Ok(count)
    }
}

/// Configuration for the Redis record store.
#[derive(Debug, Clone)]
pub struct RedisRecordStoreConfig {
    /// Key prefix for the log and alert lists (default: "gatekeeper-records:")
    pub key_prefix: String,
}

impl RedisRecordStoreConfig {
    /// Check the prefix before any key is built from it.
    ///
    /// # Errors
    /// Returns an `InvalidClientConfig` error for an empty prefix or one
    /// containing a glob character.
    pub fn validate(&self) -> Result<(), RedisError> {
        validate_prefix(&self.key_prefix)
    }
}

impl Default for RedisRecordStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "gatekeeper-records:".to_string(),
        }
    }
}

/// Redis-backed record store keeping logs and alerts as JSON lists.
#[derive(Clone)]
pub struct RedisRecordStore {
    connection: ConnectionManager,
    config: RedisRecordStoreConfig,
}

impl fmt::Debug for RedisRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisRecordStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisRecordStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisRecordStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if the key prefix is invalid or the connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisRecordStoreConfig,
    ) -> Result<Self, RedisError> {
        config.validate()?;
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Self::from_connection(connection, config)
    }

    /// # Errors
    /// Returns error if the key prefix is invalid.
    pub fn from_connection(
        connection: ConnectionManager,
        config: RedisRecordStoreConfig,
    ) -> Result<Self, RedisError> {
        config.validate()?;
        Ok(Self { connection, config })
    }

    fn logs_key(&self) -> String {
        format!("{}logs", self.config.key_prefix)
    }

    fn alerts_key(&self) -> String {
        format!("{}alerts", self.config.key_prefix)
    }

    async fn push<T: serde::Serialize>(&self, list: String, record: &T) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let _: i64 = self.connection.clone().lpush(list, json).await?;
        Ok(())
    }

    async fn range<T: serde::de::DeserializeOwned>(
        &self,
        list: String,
        limit: Option<usize>,
    ) -> Result<Vec<T>, StoreError> {
        let stop = match limit {
            Some(0) => return Ok(Vec::new()),
            Some(n) => isize::try_from(n - 1).unwrap_or(isize::MAX),
            None => -1,
        };
        let raw: Vec<String> = self.connection.clone().lrange(list, 0, stop).await?;
        raw.iter()
            .map(|doc| serde_json::from_str(doc).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn insert_log(&self, record: LogRecord) -> Result<(), StoreError> {
        self.push(self.logs_key(), &record).await
    }

    async fn insert_alert(&self, record: AlertRecord) -> Result<(), StoreError> {
        self.push(self.alerts_key(), &record).await
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<LogRecord>, StoreError> {
        self.range(self.logs_key(), Some(limit)).await
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, StoreError> {
        self.range(self.alerts_key(), Some(limit)).await
    }

    async fn alerts_for(&self, client: &ClientId) -> Result<Vec<AlertRecord>, StoreError> {
        let alerts: Vec<AlertRecord> = self.range(self.alerts_key(), None).await?;
        Ok(alerts.into_iter().filter(|a| a.concerns(client)).collect())
    }
}
