// File: testing-framework/src/orchestrator/clock.rs
//
// Clock Abstraction
//
// The supervisor reads two clocks: the monotonic one drives the alarm timer,
// the wall clock measures how long a phase took. They are deliberately kept
// separate so a disagreement between them (negative elapsed time) can be
// detected and reproduced in tests.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Clock abstraction trait - the supervisor only reads time through it
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use tos_test_supervisor::orchestrator::clock::{Clock, SystemClock};
///
/// #[tokio::main]
/// async fn main() {
///     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
///     let started_at = clock.wall_time();
///     clock.sleep(Duration::from_millis(10)).await;
///     assert!(clock.wall_time() >= started_at);
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Returns the current monotonic instant, used to schedule timers
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time, used to measure phase durations
    ///
    /// Unlike `now()`, nothing guarantees this value never goes backwards.
    fn wall_time(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// True when sleeping moves the clock itself
    ///
    /// A timer sleeping on such a clock would consume the budget it is
    /// supposed to watch, alarms on it must be fired explicitly.
    fn is_scripted(&self) -> bool {
        false
    }
}

/// System real-time clock (production environment)
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Paused clock (test environment)
///
/// Works with tokio's `time::pause()`: time only moves through `advance()` or
/// through the runtime auto-advancing to the next timer when every task is
/// idle. The wall clock follows the paused monotonic clock.
///
/// Must be created inside a `current_thread` runtime where time is not yet
/// paused, i.e. a plain `#[tokio::test]`.
pub struct PausedClock {
    wall_origin: DateTime<Utc>,
    instant_origin: Instant,
}

impl PausedClock {
    /// Creates a new PausedClock and pauses tokio time
    pub fn new() -> Self {
        time::pause();
        Self {
            wall_origin: Utc::now(),
            instant_origin: time::Instant::now(),
        }
    }

    /// Manually advance time by the specified duration
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        let elapsed = time::Instant::now().saturating_duration_since(self.instant_origin);
        self.wall_origin + TimeDelta::from_std(elapsed).unwrap_or_default()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

struct ManualState {
    elapsed: Duration,
    wall: DateTime<Utc>,
}

/// Fully scripted clock
///
/// Nothing moves unless `advance()` or `skew_wall()` is called, `sleep()`
/// advances the clock by the requested duration and yields once. Combined with
/// `ManualInterruptSource` it gives exact budget arithmetic, and `skew_wall()`
/// can move the wall clock backwards to reproduce clock disagreement.
pub struct ManualClock {
    origin: Instant,
    state: Mutex<ManualState>,
}

impl ManualClock {
    /// Creates a clock frozen at the current time
    pub fn new() -> Self {
        Self {
            origin: time::Instant::now(),
            state: Mutex::new(ManualState {
                elapsed: Duration::ZERO,
                wall: Utc::now(),
            }),
        }
    }

    /// Moves both the monotonic and the wall clock forward
    pub fn advance(&self, d: Duration) {
        let mut state = self.state.lock();
        state.elapsed += d;
        state.wall += TimeDelta::from_std(d).unwrap_or_default();
    }

    /// Moves only the wall clock, negative deltas go back in time
    pub fn skew_wall(&self, delta: TimeDelta) {
        self.state.lock().wall += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state.lock().elapsed
    }

    fn wall_time(&self) -> DateTime<Utc> {
        self.state.lock().wall
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.advance(d);
            tokio::task::yield_now().await;
        })
    }

    fn is_scripted(&self) -> bool {
        true
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}
