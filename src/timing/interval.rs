// src/timing/interval.rs
//! Repeating deadline scheduler with skip counting
//!
//! Deadlines are derived from the anchor tick captured at start, not from
//! repeated relative sleeps: `deadline = anchor + period * ceil(elapsed /
//! period)`. Any single wait may be stretched by scheduler latency, but the
//! long-run average period stays exact because the next deadline is always
//! computed from the anchor.

use crate::error::{StreamError, StreamResult};
use crate::utils::time::ClockSource;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct IntervalState {
    period_micros: u64,
    anchor_micros: u64,
    // Index of the last deadline this timer slept to
    tick_index: u64,
}

/// Registry of named repeating interval timers.
///
/// Timers are keyed by caller-chosen opaque handles and are independent of
/// any stream session; each must be released with [`clean`](Self::clean).
pub struct IntervalRegistry {
    clock: Arc<dyn ClockSource>,
    timers: Mutex<HashMap<i32, IntervalState>>,
}

impl IntervalRegistry {
    /// Create a registry backed by the given clock
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            clock,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Start a repeating interval, anchored at the current tick
    pub fn start(&self, handle: i32, period_micros: u64) -> StreamResult<()> {
        if period_micros == 0 {
            return Err(StreamError::InvalidConfiguration {
                reason: "interval period must be positive".to_string(),
            });
        }

        let mut timers = self.timers.lock();
        if timers.contains_key(&handle) {
            return Err(StreamError::DuplicateHandle { handle });
        }

        timers.insert(
            handle,
            IntervalState {
                period_micros,
                anchor_micros: self.clock.now_micros(),
                tick_index: 0,
            },
        );
        Ok(())
    }

    /// Sleep until the next deadline and report skipped periods.
    ///
    /// Returns 0 when the caller is on schedule. A return of `n > 0` means
    /// `n` full periods elapsed since the previous wait without being slept
    /// to; the internal tick counter advances past them so the following
    /// wait targets a future deadline.
    pub fn wait_for_next(&self, handle: i32) -> StreamResult<u64> {
        let (deadline, skipped) = {
            let mut timers = self.timers.lock();
            let state = timers
                .get_mut(&handle)
                .ok_or(StreamError::InvalidHandle { handle })?;

            let now = self.clock.now_micros();
            let elapsed = now.saturating_sub(state.anchor_micros);
            let mut due_index = if elapsed == 0 {
                1
            } else {
                elapsed.div_ceil(state.period_micros)
            };
            // Landing exactly on an already-consumed deadline still owes a
            // full period of sleep
            if due_index <= state.tick_index {
                due_index = state.tick_index + 1;
            }

            let deadline = state.anchor_micros + due_index * state.period_micros;
            let skipped = due_index - state.tick_index - 1;
            state.tick_index = due_index;
            (deadline, skipped)
        };

        // Sleep outside the lock so other timers stay usable
        self.clock.sleep_until_micros(deadline);
        Ok(skipped)
    }

    /// Release a timer; subsequent waits on the handle fail
    pub fn clean(&self, handle: i32) -> StreamResult<()> {
        match self.timers.lock().remove(&handle) {
            Some(_) => Ok(()),
            None => Err(StreamError::InvalidHandle { handle }),
        }
    }

    /// Number of active timers
    pub fn active_count(&self) -> usize {
        self.timers.lock().len()
    }
}
