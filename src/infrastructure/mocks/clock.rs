//! Mock clock for testing.

use crate::application::ports::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wall-clock reading of every `MockClock` before it is advanced.
const EPOCH_SECS: i64 = 1_700_000_000;

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of window expiry, ban lifetimes and circuit breaker recovery. The
/// monotonic and wall-clock readings advance together.
///
/// # Examples
///
/// ```ignore
/// use request_gatekeeper::infrastructure::mocks::MockClock;
/// use request_gatekeeper::application::ports::Clock;
/// use std::time::Duration;
///
/// let clock = MockClock::new();
/// let start = clock.now();
/// let wall = clock.utc_now();
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start + Duration::from_secs(10));
/// assert_eq!((clock.utc_now() - wall).num_seconds(), 10);
/// ```
///
/// # Thread Safety
///
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<ClockState>>,
}

#[derive(Debug)]
struct ClockState {
    start: Instant,
    offset: Duration,
    wall_start: DateTime<Utc>,
}

impl MockClock {
    /// Create a mock clock starting now, with a fixed wall-clock reading.
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Create a mock clock starting at a specific instant.
    pub fn starting_at(start: Instant) -> Self {
        let wall_start = DateTime::from_timestamp(EPOCH_SECS, 0).unwrap_or_default();
        Self {
            state: Arc::new(Mutex::new(ClockState {
                start,
                offset: Duration::ZERO,
                wall_start,
            })),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        self.state.lock().offset += duration;
    }

    /// Set the clock to a specific instant, which must not precede the start.
    pub fn set(&self, instant: Instant) {
        let mut state = self.state.lock();
        state.offset = instant.saturating_duration_since(state.start);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        let state = self.state.lock();
        state.start + state.offset
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let state = self.state.lock();
        let offset = chrono::Duration::from_std(state.offset)
            .expect("MockClock advanced beyond the representable wall-clock range");
        state.wall_start + offset
    }
}
