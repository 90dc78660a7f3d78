//! Time utilities for the KCP engine
//!
//! The engine runs on a 32-bit millisecond clock that wraps roughly every
//! 49.7 days; comparisons inside the engine are wrap-aware, so only the
//! low 32 bits of elapsed milliseconds are ever handed to it.

use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

/// Monotonic timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(Instant);

impl Timestamp {
    /// Get the current timestamp
    #[inline]
    pub fn now() -> Self {
        Timestamp(Instant::now())
    }

    /// Create a timestamp from a base instant
    #[inline]
    pub fn from_instant(instant: Instant) -> Self {
        Timestamp(instant)
    }

    /// Get the underlying instant
    #[inline]
    pub fn as_instant(&self) -> Instant {
        self.0
    }

    /// Calculate elapsed time since this timestamp
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// Milliseconds elapsed since `reference`, saturating at zero
    pub fn as_millis_since(&self, reference: Timestamp) -> u64 {
        self.0
            .saturating_duration_since(reference.0)
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    /// Protocol clock value: milliseconds since `reference`, wrapping at 2^32
    pub fn as_kcp_timestamp(&self, reference: Timestamp) -> u32 {
        self.as_millis_since(reference) as u32
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 + duration)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, other: Timestamp) -> Duration {
        self.0.saturating_duration_since(other.0)
    }
}

/// Source of the protocol clock for a set of connections
///
/// Every connection driven from one loop should read the same clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Timestamp,
}

impl Clock {
    /// Start a clock at zero
    pub fn new() -> Self {
        Clock {
            origin: Timestamp::now(),
        }
    }

    /// Current protocol clock value (ms)
    #[inline]
    pub fn now_ms(&self) -> u32 {
        Timestamp::now().as_kcp_timestamp(self.origin)
    }

    /// Time since the clock started
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for periodic operations
///
/// Used for statistics reports in the command-line tools.
pub struct Timer {
    interval: Duration,
    last_fire: Timestamp,
}

impl Timer {
    /// Create a new timer with the given interval
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Timestamp::now(),
        }
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.last_fire = Timestamp::now();
    }

    /// Get time until next expiration
    pub fn time_until_expiration(&self) -> Duration {
        self.interval.saturating_sub(self.last_fire.elapsed())
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timestamp_ordering() {
        let ts1 = Timestamp::now();
        thread::sleep(Duration::from_millis(10));
        let ts2 = Timestamp::now();

        assert!(ts2 > ts1);
        assert!(ts2 - ts1 >= Duration::from_millis(10));
        assert_eq!(ts1 - ts2, Duration::ZERO);
    }

    #[test]
    fn test_kcp_timestamp() {
        let reference = Timestamp::now();
        let later = reference + Duration::from_millis(1500);
        assert_eq!(later.as_kcp_timestamp(reference), 1500);
        assert_eq!(reference.as_kcp_timestamp(later), 0);
    }

    #[test]
    fn test_kcp_timestamp_wraps() {
        let reference = Timestamp::now();
        let later = reference + Duration::from_millis(u32::MAX as u64 + 6);
        assert_eq!(later.as_kcp_timestamp(reference), 5);
    }

    #[test]
    fn test_clock_advances() {
        let clock = Clock::new();
        let first = clock.now_ms();
        thread::sleep(Duration::from_millis(15));
        let second = clock.now_ms();
        assert!(second.wrapping_sub(first) >= 10);
    }

    #[test]
    fn test_timer() {
        let mut timer = Timer::new(Duration::from_millis(10));
        assert!(!timer.expired());

        thread::sleep(Duration::from_millis(11));
        assert!(timer.expired());
        assert_eq!(timer.time_until_expiration(), Duration::ZERO);

        timer.reset();
        assert!(!timer.expired());
    }

    #[test]
    fn test_timer_try_fire() {
        let mut timer = Timer::new(Duration::from_millis(10));
        assert!(!timer.try_fire());

        thread::sleep(Duration::from_millis(11));
        assert!(timer.try_fire());
        assert!(!timer.try_fire());
    }
}
