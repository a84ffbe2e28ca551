// src/timing/pacer.rs
//! Backlog-proportional poll pacing
//!
//! Pure computation: given how far the host buffer is from holding one full
//! read batch, decide how long a polling consumer should sleep before its
//! next read. Sleeping the naive "time until the batch completes" oversleeps
//! whenever the device runs slightly fast, so the sleep is scaled down by a
//! fixed dampening factor and drops to zero once the buffer is nearly ready.

use crate::config::constants::timing::BACKLOG_DAMPENING;
use std::time::Duration;

/// Compute the sleep before the next poll of a streaming session.
///
/// `host_backlog` is the scan count reported by the previous read. The
/// result is zero when a full batch is already (or nearly) available, and
/// approaches `BACKLOG_DAMPENING` of one batch period on an empty buffer.
pub fn next_poll_delay(scans_per_read: usize, scan_rate: f64, host_backlog: u64) -> Duration {
    if scans_per_read == 0 || scan_rate.is_nan() || scan_rate <= 0.0 {
        return Duration::ZERO;
    }

    let readiness_ratio = host_backlog as f64 / scans_per_read as f64;
    if readiness_ratio >= BACKLOG_DAMPENING {
        return Duration::ZERO;
    }

    let sleep_factor = (1.0 - readiness_ratio) * BACKLOG_DAMPENING;
    let sleep_seconds = sleep_factor * scans_per_read as f64 / scan_rate;
    Duration::from_secs_f64(sleep_seconds)
}
