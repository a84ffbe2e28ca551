// src/utils/time.rs
//! Monotonic clock source
//!
//! Leaf dependency of every timed component. The trait abstracts the
//! platform's steady clock behind microsecond ticks so interval timers, the
//! transport worker, and the simulated device all pace off the same source,
//! and so tests can substitute a mock clock and drive time by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Clock source abstraction for dependency injection and testing
pub trait ClockSource: Send + Sync {
    /// Current monotonic tick in microseconds
    fn now_micros(&self) -> u64;

    /// Block the calling thread until the clock reaches `deadline_micros`.
    ///
    /// Returns immediately if the deadline has already passed.
    fn sleep_until_micros(&self, deadline_micros: u64);
}

/// Steady clock backed by [`Instant`], anchored at construction
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now_micros(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_until_micros(&self, deadline_micros: u64) {
        let now = self.now_micros();
        if deadline_micros > now {
            std::thread::sleep(Duration::from_micros(deadline_micros - now));
        }
    }
}

/// Mock clock for deterministic testing.
///
/// `sleep_until_micros` advances the clock instead of blocking, so timed
/// loops run at full speed under test while observing exact deadlines.
pub struct MockClock {
    current_micros: AtomicU64,
}

impl MockClock {
    /// Create a mock clock starting at `initial_micros`
    pub fn new(initial_micros: u64) -> Self {
        Self {
            current_micros: AtomicU64::new(initial_micros),
        }
    }

    /// Advance the clock by `micros`
    pub fn advance_by(&self, micros: u64) {
        self.current_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Jump the clock to an absolute tick
    pub fn set_micros(&self, micros: u64) {
        self.current_micros.store(micros, Ordering::Relaxed);
    }
}

impl ClockSource for MockClock {
    fn now_micros(&self) -> u64 {
        self.current_micros.load(Ordering::Relaxed)
    }

    fn sleep_until_micros(&self, deadline_micros: u64) {
        // Never moves backwards even if another thread advanced past us
        self.current_micros
            .fetch_max(deadline_micros, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let first = clock.now_micros();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now_micros() > first);
    }

    #[test]
    fn test_monotonic_sleep_until() {
        let clock = MonotonicClock::new();
        let deadline = clock.now_micros() + 3_000;
        clock.sleep_until_micros(deadline);
        assert!(clock.now_micros() >= deadline);

        // Past deadlines return immediately
        clock.sleep_until_micros(0);
    }

    #[test]
    fn test_mock_clock_control() {
        let clock = MockClock::new(1_000);
        assert_eq!(clock.now_micros(), 1_000);

        clock.advance_by(500);
        assert_eq!(clock.now_micros(), 1_500);

        clock.sleep_until_micros(5_000);
        assert_eq!(clock.now_micros(), 5_000);

        // Sleeping to a past deadline must not rewind
        clock.sleep_until_micros(100);
        assert_eq!(clock.now_micros(), 5_000);
    }
}
