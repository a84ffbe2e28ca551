// tests/interval_timing.rs
//! Integration tests for interval timer pacing

use daq_core::{ClockSource, IntervalRegistry, MockClock, MonotonicClock, StreamError};
use proptest::prelude::*;
use serial_test::serial;
use std::sync::Arc;
use std::time::Instant;

#[test]
fn test_drift_freedom_over_many_periods() {
    let clock = Arc::new(MockClock::new(0));
    let registry = IntervalRegistry::new(clock.clone());
    registry.start(1, 1_000).unwrap();

    let mut previous = clock.now_micros();
    let mut gap_sum = 0u64;
    for _ in 0..100 {
        let skipped = registry.wait_for_next(1).unwrap();
        assert_eq!(skipped, 0);

        let now = clock.now_micros();
        gap_sum += now - previous;
        previous = now;
    }

    // No drift accumulates: 100 waits of period 1000 land exactly on
    // anchor + 100 * 1000, and the inter-call gaps sum to the same
    assert_eq!(clock.now_micros(), 100_000);
    assert_eq!(gap_sum, 100_000);
}

#[test]
fn test_skips_keep_long_run_average_exact() {
    let clock = Arc::new(MockClock::new(0));
    let registry = IntervalRegistry::new(clock.clone());
    registry.start(1, 1_000).unwrap();

    // A stall of 5.3 periods costs skips, not drift
    clock.advance_by(5_300);
    let skipped = registry.wait_for_next(1).unwrap();
    assert_eq!(skipped, 5);
    assert_eq!(clock.now_micros(), 6_000);

    // Subsequent waits are back on the original grid
    for i in 1..=4u64 {
        assert_eq!(registry.wait_for_next(1).unwrap(), 0);
        assert_eq!(clock.now_micros(), 6_000 + i * 1_000);
    }
}

#[test]
fn test_handle_misuse() {
    let clock = Arc::new(MockClock::new(0));
    let registry = IntervalRegistry::new(clock);

    assert_eq!(
        registry.wait_for_next(3),
        Err(StreamError::InvalidHandle { handle: 3 })
    );

    registry.start(3, 500).unwrap();
    assert_eq!(
        registry.start(3, 500),
        Err(StreamError::DuplicateHandle { handle: 3 })
    );

    registry.clean(3).unwrap();
    assert_eq!(
        registry.wait_for_next(3),
        Err(StreamError::InvalidHandle { handle: 3 })
    );

    // A cleaned handle can be started again
    registry.start(3, 500).unwrap();
    registry.clean(3).unwrap();
}

#[test]
#[serial]
fn test_real_clock_paces_waits() {
    let clock = Arc::new(MonotonicClock::new());
    let registry = IntervalRegistry::new(clock);
    registry.start(1, 10_000).unwrap();

    let began = Instant::now();
    let mut total_skipped = 0u64;
    for _ in 0..5 {
        total_skipped += registry.wait_for_next(1).unwrap();
    }

    // Five waits plus any skipped periods account for at least 50 ms
    let floor_micros = (5 + total_skipped) * 10_000;
    assert!(began.elapsed().as_micros() as u64 >= floor_micros - 10_000);

    registry.clean(1).unwrap();
}

proptest! {
    // After k waits with S total skips, the clock sits exactly on deadline
    // (k + S) of the anchor grid; this is the drift-freedom law under
    // arbitrary caller lateness
    #[test]
    fn prop_deadlines_stay_on_anchor_grid(
        period in 1u64..100_000,
        stalls in prop::collection::vec(0u64..300_000, 1..40),
    ) {
        let clock = Arc::new(MockClock::new(0));
        let registry = IntervalRegistry::new(clock.clone());
        registry.start(1, period).unwrap();

        let mut waits = 0u64;
        let mut skips = 0u64;
        for stall in stalls {
            clock.advance_by(stall);
            skips += registry.wait_for_next(1).unwrap();
            waits += 1;

            let now = clock.now_micros();
            prop_assert_eq!(now % period, 0);
            prop_assert_eq!(now, (waits + skips) * period);
        }
    }
}
