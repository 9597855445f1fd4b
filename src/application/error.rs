//! Errors raised by store adapters.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Failure of a counter store or record store call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The call did not complete within the configured bound
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    /// `increment` hit a key holding a non-integer value
    #[error("value at `{key}` is not an integer")]
    NotAnInteger { key: String },
    /// A record could not be encoded or decoded
    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the error means the store itself is unhealthy, as opposed to a
    /// problem with the data.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

#[cfg(feature = "redis-storage")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Run a store call with an upper bound on its duration.
///
/// # Errors
/// Returns the call's own error, or `StoreError::Timeout` once `limit` elapses.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let ok = bounded(Duration::from_secs(1), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = bounded(Duration::from_secs(1), async {
            Err::<(), _>(StoreError::Unavailable("refused".into()))
        })
        .await;
        assert!(matches!(err, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out() {
        let result = bounded(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(())
        })
        .await;

        match result {
            Err(StoreError::Timeout(limit)) => assert_eq!(limit, Duration::from_millis(50)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_unavailability_classification() {
        assert!(StoreError::Unavailable("x".into()).is_unavailable());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_unavailable());
        assert!(!StoreError::NotAnInteger { key: "k".into() }.is_unavailable());
    }
}
