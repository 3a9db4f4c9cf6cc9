//! Wall-clock and monotonic time, injectable for tests.
//!
//! Commit timestamps come from the wall clock; cache TTLs and lease checks
//! use the monotonic reading so they survive clock steps. Process-wide
//! collaborators receive a `Arc<dyn Clock>` at construction and never reach
//! for ambient time.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Time source for the engine.
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Monotonic reading since an arbitrary epoch.
    fn monotonic(&self) -> Duration;

    /// Current wall-clock time as epoch milliseconds.
    fn now_millis(&self) -> i64 {
        self.now_utc().timestamp_millis()
    }
}

/// The process clock.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Creates a system clock anchored at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.start.elapsed()
    }
}

/// A manually-advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<(DateTime<Utc>, Duration)>,
}

impl ManualClock {
    /// Creates a manual clock at the given wall time.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((now, Duration::ZERO)),
        }
    }

    /// Creates a manual clock at the epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::at(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Advances both readings by `delta`.
    ///
    /// # Panics
    ///
    /// Panics when the internal lock is poisoned.
    pub fn advance(&self, delta: Duration) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.0 += chrono::Duration::from_std(delta).expect("delta out of range");
        state.1 += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.state.lock().expect("lock poisoned").0
    }

    fn monotonic(&self) -> Duration {
        self.state.lock().expect("lock poisoned").1
    }
}
