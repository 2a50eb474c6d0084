//! Clock abstraction for timestamps and backoff sleeps.
//!
//! The dispatcher stamps outcomes and sleeps between retry attempts through
//! `Clock`, so tests can run retry schedules instantly and assert on the
//! exact delays that were requested.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Source of time for the dispatch engine.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotonic instant for measuring durations.
    fn now(&self) -> Instant;

    /// Wall-clock time for outcome timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Waits for `duration`.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug)]
struct TestClockState {
    offset: Duration,
    wall_start: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Deterministic clock for tests.
///
/// Sleeping advances virtual time immediately and remembers the requested
/// duration. Clones share state.
#[derive(Debug, Clone)]
pub struct TestClock {
    base: Instant,
    state: Arc<Mutex<TestClockState>>,
}

impl TestClock {
    /// Creates a clock starting at the current wall time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a clock whose wall time starts at `start`.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            base: Instant::now(),
            state: Arc::new(Mutex::new(TestClockState {
                offset: Duration::ZERO,
                wall_start: start,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Moves virtual time forward.
    pub fn advance(&self, duration: Duration) {
        self.with_state(|state| state.offset += duration);
    }

    /// Durations passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.with_state(|state| state.sleeps.clone())
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.with_state(|state| state.offset)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut TestClockState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.with_state(|state| {
            let offset = chrono::Duration::from_std(state.offset).unwrap_or_default();
            state.wall_start + offset
        })
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.with_state(|state| {
            state.offset += duration;
            state.sleeps.push(duration);
        });
        Box::pin(tokio::task::yield_now())
    }
}
