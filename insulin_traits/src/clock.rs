use chrono::{DateTime, Utc};
use std::thread;
use std::time::Duration;

/// Wall-clock abstraction for the dosing loop.
///
/// - now(): current UTC time
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - minutes_since(): helper to compute elapsed minutes from an earlier time
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, d: Duration);

    /// Minutes elapsed since `earlier`, negative if `earlier` is in the future.
    fn minutes_since(&self, earlier: DateTime<Utc>) -> f64 {
        let dur = self.now().signed_duration_since(earlier);
        dur.num_milliseconds() as f64 / 60_000.0
    }
}

/// Default clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

pub mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Deterministic clock whose time can be advanced manually.
    ///
    /// now() = origin + offset
    /// sleep(d) advances internal time by d without actually sleeping.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: DateTime<Utc>,
        offset: Arc<Mutex<chrono::Duration>>,
    }

    impl TestClock {
        pub fn new(origin: DateTime<Utc>) -> Self {
            Self {
                origin,
                offset: Arc::new(Mutex::new(chrono::Duration::zero())),
            }
        }

        /// Advance the clock by the given duration.
        pub fn advance(&self, d: Duration) {
            let step = chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero());
            if let Ok(mut off) = self.offset.lock() {
                *off += step;
            }
        }

        /// Advance the clock by whole minutes.
        pub fn advance_minutes(&self, minutes: i64) {
            if let Ok(mut off) = self.offset.lock() {
                *off += chrono::Duration::minutes(minutes);
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            let off = self
                .offset
                .lock()
                .map(|g| *g)
                .unwrap_or_else(|_| chrono::Duration::zero());
            self.origin + off
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use chrono::TimeZone;

        #[test]
        fn advances_without_sleeping() {
            let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let clock = TestClock::new(origin);
            clock.sleep(Duration::from_secs(90));
            clock.advance_minutes(3);
            assert_eq!(clock.now(), origin + chrono::Duration::seconds(270));
            assert!((clock.minutes_since(origin) - 4.5).abs() < 1e-9);
        }
    }
}
