//! Operational escape hatch clearing all counters and bans.

use std::sync::Arc;
use std::time::Duration;

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::error::{bounded, StoreError};
use crate::application::ports::CounterStore;

/// Clears the whole counter store on demand.
///
/// Its route must stay exempt from the gate, otherwise a banned operator could
/// never reach it; `GatekeeperConfig` always exempts the configured reset path.
#[derive(Debug, Clone)]
pub struct ResetHook {
    store: Arc<dyn CounterStore>,
    circuit_breaker: Arc<CircuitBreaker>,
    timeout: Duration,
}

impl ResetHook {
    pub fn new(
        store: Arc<dyn CounterStore>,
        circuit_breaker: Arc<CircuitBreaker>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            circuit_breaker,
            timeout,
        }
    }

    /// Delete every window counter and every ban.
    ///
    /// # Errors
    /// Returns `StoreError` if the store could not be cleared; nothing is
    /// retried.
    pub async fn reset_all(&self) -> Result<(), StoreError> {
        match bounded(self.timeout, self.store.delete_all()).await {
            Ok(()) => {
                self.circuit_breaker.reset();
                tracing::info!("counter store cleared, all clients unbanned");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to clear counter store");
                Err(e)
            }
        }
    }
}
