//! Clock abstraction for timestamp generation and expiry checks.
//!
//! Every component that needs "now" (record stamping, TTL sweeps, LRU
//! bookkeeping, delta-sync cursors) reads it through [`ClockSource`] so that
//! tests can substitute a deterministic clock. The default implementation
//! ([`SystemClock`]) delegates to `chrono::Utc::now()`.
//!
//! [`MonotonicClock`] wraps any source and guarantees strictly increasing
//! instants within a process: if the wall clock stalls or steps backwards,
//! the issued timestamp is bumped one microsecond past the previous one.
//! Record timestamps drive Last-Write-Wins conflict resolution, so two
//! writes from the same process must never carry the same instant.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Abstraction over the wall clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a fixed or
/// manually advanced one.
pub trait ClockSource: Send + Sync {
    /// Returns the current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock wrapper that issues strictly increasing instants.
///
/// When the underlying source advances, its reading is used as-is. When it
/// is unchanged or behind the last issued instant, the next instant is the
/// previous one plus one microsecond.
pub struct MonotonicClock {
    source: Box<dyn ClockSource>,
    last: Mutex<DateTime<Utc>>,
}

impl MonotonicClock {
    /// Creates a monotonic clock over the given source.
    #[must_use]
    pub fn new(source: Box<dyn ClockSource>) -> Self {
        Self {
            source,
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// Issues the next strictly increasing instant.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned, which can only happen if a
    /// previous `tick` panicked.
    pub fn tick(&self) -> DateTime<Utc> {
        let now = self.source.now();
        let mut last = self.last.lock().expect("monotonic clock lock poisoned");
        let issued = if now > *last {
            now
        } else {
            if now + Duration::seconds(1) < *last {
                tracing::warn!(
                    source_now = %now,
                    last_issued = %*last,
                    "system clock moved backwards; holding the monotonic line"
                );
            }
            *last + Duration::microseconds(1)
        };
        *last = issued;
        issued
    }

    /// Reads the underlying source without the monotonic guarantee.
    ///
    /// Used for expiry checks, where comparing against the raw wall clock is
    /// the intended semantics.
    pub fn raw_now(&self) -> DateTime<Utc> {
        self.source.now()
    }
}

/// Test doubles for the clock, shared with downstream crates' test suites
/// via the `test-util` feature.
#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Deterministic clock source for tests. Time is controlled explicitly
    /// as milliseconds since the Unix epoch.
    pub struct FixedClock {
        millis: Arc<AtomicI64>,
    }

    impl FixedClock {
        pub fn new(initial_millis: i64) -> (Self, Arc<AtomicI64>) {
            let millis = Arc::new(AtomicI64::new(initial_millis));
            (
                Self {
                    millis: Arc::clone(&millis),
                },
                millis,
            )
        }
    }

    impl ClockSource for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::Relaxed))
                .expect("test clock millis in range")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::test_support::FixedClock;
    use super::*;

    #[test]
    fn system_clock_is_recent() {
        let clock = SystemClock;
        let now = clock.now();
        assert!(now.timestamp() > 1_500_000_000);
    }

    #[test]
    fn monotonic_uses_source_when_it_advances() {
        let (clock, millis) = FixedClock::new(1_000_000);
        let mono = MonotonicClock::new(Box::new(clock));

        let t1 = mono.tick();
        millis.store(1_000_500, Ordering::Relaxed);
        let t2 = mono.tick();

        assert_eq!(t1.timestamp_millis(), 1_000_000);
        assert_eq!(t2.timestamp_millis(), 1_000_500);
    }

    #[test]
    fn monotonic_bumps_when_source_stalls() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mono = MonotonicClock::new(Box::new(clock));

        let t1 = mono.tick();
        let t2 = mono.tick();
        let t3 = mono.tick();

        assert!(t1 < t2);
        assert!(t2 < t3);
        // Stalled wall clock: each tick is one microsecond after the last.
        assert_eq!(t2 - t1, Duration::microseconds(1));
        assert_eq!(t3 - t2, Duration::microseconds(1));
    }

    #[test]
    fn monotonic_bumps_when_source_steps_backwards() {
        let (clock, millis) = FixedClock::new(1_000_000);
        let mono = MonotonicClock::new(Box::new(clock));

        let t1 = mono.tick();
        millis.store(900_000, Ordering::Relaxed);
        let t2 = mono.tick();

        assert!(t2 > t1);
    }

    #[test]
    fn raw_now_bypasses_the_monotonic_guard() {
        let (clock, millis) = FixedClock::new(1_000_000);
        let mono = MonotonicClock::new(Box::new(clock));

        mono.tick();
        millis.store(500_000, Ordering::Relaxed);

        // tick() would refuse to go backwards; raw_now() reports the source.
        assert_eq!(mono.raw_now().timestamp_millis(), 500_000);
    }

    #[test]
    fn hundred_ticks_all_unique_and_increasing() {
        let (clock, _) = FixedClock::new(1_000_000);
        let mono = MonotonicClock::new(Box::new(clock));

        let ticks: Vec<_> = (0..100).map(|_| mono.tick()).collect();
        for pair in ticks.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
