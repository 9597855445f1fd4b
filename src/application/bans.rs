//! Registry of banned clients.
//!
//! Bans live in the counter store under `blocked:{client}`. They carry no TTL
//! unless the policy asks for time-boxed bans, and there is no in-band unban:
//! only the reset hook clears them.

use std::sync::Arc;
use std::time::Duration;

use crate::application::error::{bounded, StoreError};
use crate::application::ports::CounterStore;
use crate::domain::client::{ClientId, BLOCKED_KEY_PREFIX};

/// Sentinel stored under a ban key.
const BAN_SENTINEL: &str = "true";

/// Result of a ban attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanOutcome {
    /// This call created the ban
    Created,
    /// The client was already banned by an earlier or concurrent request
    AlreadyBanned,
}

/// Tracks which clients are banned.
#[derive(Debug, Clone)]
pub struct BanRegistry {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
}

impl BanRegistry {
    /// Create a registry over `store`, bounding each call by `timeout`.
    pub fn new(store: Arc<dyn CounterStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Whether `client` is currently banned.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be read in time.
    pub async fn is_banned(&self, client: &ClientId) -> Result<bool, StoreError> {
        let key = client.blocked_key();
        let value = bounded(self.timeout, self.store.get(&key)).await?;
        Ok(value.is_some())
    }

    /// Ban `client`, for `duration` or until reset when `None`.
    ///
    /// The write is set-if-absent, so of several concurrent callers exactly
    /// one sees `BanOutcome::Created`.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be written in time.
    pub async fn ban(
        &self,
        client: &ClientId,
        duration: Option<Duration>,
    ) -> Result<BanOutcome, StoreError> {
        let key = client.blocked_key();
        let created = bounded(
            self.timeout,
            self.store.set_if_absent(&key, BAN_SENTINEL, duration),
        )
        .await?;

        if created {
            Ok(BanOutcome::Created)
        } else {
            Ok(BanOutcome::AlreadyBanned)
        }
    }

    /// Every banned client.
    ///
    /// # Errors
    /// Returns `StoreError` if the store cannot be scanned in time.
    pub async fn banned_clients(&self) -> Result<Vec<ClientId>, StoreError> {
        let keys = bounded(self.timeout, self.store.keys(BLOCKED_KEY_PREFIX)).await?;
        let mut clients: Vec<ClientId> = keys.iter().filter_map(|k| ClientId::from_key(k)).collect();
        clients.sort();
        Ok(clients)
    }
}
