//! Admission policy: window budget, ban lifetime and store-failure handling.
//!
//! The policy is pure. It turns a window count into a verdict and describes
//! what to do when the counter store cannot be consulted; the rate limiter
//! applies it.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Error returned when a policy is constructed with invalid parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The request threshold must allow at least one request per window
    #[error("request threshold must be greater than 0")]
    ZeroThreshold,
    /// The window must have a non-zero length
    #[error("window length must be greater than 0")]
    ZeroWindow,
    /// A time-boxed ban must have a non-zero length
    #[error("ban duration must be greater than 0")]
    ZeroBanDuration,
}

/// Verdict for a single window count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowVerdict {
    /// The count is within `1..=threshold`
    WithinBudget,
    /// The count exceeded the threshold; the client must be banned
    Exceeded,
}

/// Per-client request budget.
///
/// # Example
/// ```
/// use request_gatekeeper::{LimitPolicy, WindowVerdict};
/// use std::time::Duration;
///
/// let policy = LimitPolicy::new(3, Duration::from_secs(60)).unwrap();
///
/// assert_eq!(policy.evaluate(3), WindowVerdict::WithinBudget);
/// assert_eq!(policy.evaluate(4), WindowVerdict::Exceeded);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    threshold: u64,
    window: Duration,
    ban_duration: Option<Duration>,
}

impl LimitPolicy {
    /// Create a policy allowing `threshold` requests per `window`.
    ///
    /// Bans created under this policy are permanent until reset.
    ///
    /// # Errors
    /// Returns `PolicyError` if `threshold` or `window` is zero.
    pub fn new(threshold: u64, window: Duration) -> Result<Self, PolicyError> {
        if threshold == 0 {
            return Err(PolicyError::ZeroThreshold);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(Self {
            threshold,
            window,
            ban_duration: None,
        })
    }

    /// Make bans expire after `duration` instead of lasting until reset.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroBanDuration` if `duration` is zero.
    pub fn with_ban_duration(mut self, duration: Duration) -> Result<Self, PolicyError> {
        if duration.is_zero() {
            return Err(PolicyError::ZeroBanDuration);
        }
        self.ban_duration = Some(duration);
        Ok(self)
    }

    /// Judge a window count returned by the counter store.
    pub fn evaluate(&self, count: u64) -> WindowVerdict {
        if count > self.threshold {
            WindowVerdict::Exceeded
        } else {
            WindowVerdict::WithinBudget
        }
    }

    /// Requests allowed per window.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Window length; also the TTL armed on a fresh counter.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Ban lifetime, `None` for bans that last until reset.
    pub fn ban_duration(&self) -> Option<Duration> {
        self.ban_duration
    }
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            threshold: 100,
            window: Duration::from_secs(60),
            ban_duration: None,
        }
    }
}

/// What to do with a request when the store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Admit the request
    Open,
    /// Reject the request as unavailable
    Closed,
}

impl FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailMode::Open),
            "closed" => Ok(FailMode::Closed),
            other => Err(format!("expected `open` or `closed`, got `{other}`")),
        }
    }
}

impl fmt::Display for FailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailMode::Open => f.write_str("open"),
            FailMode::Closed => f.write_str("closed"),
        }
    }
}

/// Failure handling for each store call on the admission path.
///
/// The default fails closed on the ban check, so a banned client cannot slip
/// through an outage, and fails open on the counter increment, so a transient
/// outage does not lock out all traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Applied when the ban lookup fails
    pub ban_check: FailMode,
    /// Applied when the window increment fails
    pub counter: FailMode,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            ban_check: FailMode::Closed,
            counter: FailMode::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_boundary() {
        let policy = LimitPolicy::new(100, Duration::from_secs(60)).unwrap();
        assert_eq!(policy.evaluate(1), WindowVerdict::WithinBudget);
        assert_eq!(policy.evaluate(100), WindowVerdict::WithinBudget);
        assert_eq!(policy.evaluate(101), WindowVerdict::Exceeded);
        assert_eq!(policy.evaluate(5_000), WindowVerdict::Exceeded);
    }

    #[test]
    fn test_invalid_parameters() {
        assert_eq!(
            LimitPolicy::new(0, Duration::from_secs(60)),
            Err(PolicyError::ZeroThreshold)
        );
        assert_eq!(LimitPolicy::new(10, Duration::ZERO), Err(PolicyError::ZeroWindow));
        assert_eq!(
            LimitPolicy::default().with_ban_duration(Duration::ZERO),
            Err(PolicyError::ZeroBanDuration)
        );
    }

    #[test]
    fn test_bans_are_permanent_by_default() {
        let policy = LimitPolicy::default();
        assert_eq!(policy.ban_duration(), None);

        let boxed = policy.with_ban_duration(Duration::from_secs(600)).unwrap();
        assert_eq!(boxed.ban_duration(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_default_failure_policy() {
        let policy = FailurePolicy::default();
        assert_eq!(policy.ban_check, FailMode::Closed);
        assert_eq!(policy.counter, FailMode::Open);
    }

    #[test]
    fn test_fail_mode_parsing() {
        assert_eq!("open".parse::<FailMode>(), Ok(FailMode::Open));
        assert_eq!(" Closed ".parse::<FailMode>(), Ok(FailMode::Closed));
        assert!("ajar".parse::<FailMode>().is_err());
    }
}
