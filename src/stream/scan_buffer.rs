// src/stream/scan_buffer.rs
//! Host-side scan buffer
//!
//! Decouples the transport's arrival cadence from the consumer's read
//! cadence. The producer never blocks: when the buffer is at capacity,
//! incoming scans are counted and later materialized as sentinel-filled
//! scans in arrival position, mirroring the device-side overflow convention
//! so the consumer can always quantify loss. The consumer blocks until a
//! full batch exists; a partial batch is never returned.

use crate::config::constants::stream::SENTINEL_VALUE;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Why a buffer stopped accepting and delivering scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The session was stopped deliberately
    Stopped,
    /// The transport link failed mid-stream
    LinkLost,
}

struct Inner {
    samples: VecDeque<f64>,
    // Scans that arrived while full, not yet materialized as sentinels
    pending_lost_scans: u64,
    total_lost_scans: u64,
    closed: Option<CloseReason>,
}

impl Inner {
    fn queued_scans(&self, channels: usize) -> usize {
        self.samples.len() / channels
    }
}

/// Bounded, blocking queue of channel-interleaved scans
pub struct ScanBuffer {
    channels: usize,
    capacity_scans: usize,
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl ScanBuffer {
    /// Create a buffer for `channels`-wide scans holding `capacity_scans`
    pub fn new(channels: usize, capacity_scans: usize) -> Self {
        debug_assert!(channels > 0);
        debug_assert!(capacity_scans > 0);
        Self {
            channels,
            capacity_scans,
            inner: Mutex::new(Inner {
                samples: VecDeque::with_capacity(channels * capacity_scans),
                pending_lost_scans: 0,
                total_lost_scans: 0,
                closed: None,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append one scan from the producer; never blocks.
    ///
    /// At capacity the scan is recorded as lost and will surface as a
    /// sentinel-filled scan once space frees up. Enqueues after
    /// [`close`](Self::close) are discarded.
    pub fn enqueue(&self, scan: &[f64]) {
        debug_assert_eq!(scan.len(), self.channels);
        let mut inner = self.inner.lock();
        if inner.closed.is_some() {
            return;
        }

        self.flush_pending(&mut inner);
        if inner.queued_scans(self.channels) < self.capacity_scans {
            inner.samples.extend(scan.iter().copied());
        } else {
            inner.pending_lost_scans += 1;
            inner.total_lost_scans += 1;
            if inner.pending_lost_scans == 1 {
                tracing::warn!(
                    capacity_scans = self.capacity_scans,
                    "host scan buffer full, tagging incoming scans as lost"
                );
            }
        }
        drop(inner);
        self.ready.notify_all();
    }

    /// Remove exactly `scans_per_read` scans, blocking until available.
    ///
    /// Returns the batch and the scan count remaining afterwards. Fails
    /// with the close reason once the buffer is closed and fewer than
    /// `scans_per_read` scans remain; a short batch is never returned.
    pub fn dequeue_batch(&self, scans_per_read: usize) -> Result<(Vec<f64>, u64), CloseReason> {
        let needed = scans_per_read * self.channels;
        let mut inner = self.inner.lock();
        loop {
            self.flush_pending(&mut inner);
            if inner.samples.len() >= needed {
                let data: Vec<f64> = inner.samples.drain(..needed).collect();
                // Space just freed; surface any still-pending losses so the
                // backlog count reflects them
                self.flush_pending(&mut inner);
                let backlog =
                    inner.queued_scans(self.channels) as u64 + inner.pending_lost_scans;
                return Ok((data, backlog));
            }
            if let Some(reason) = inner.closed {
                return Err(reason);
            }
            self.ready.wait(&mut inner);
        }
    }

    /// Stop the buffer and release every blocked consumer.
    ///
    /// The first close reason wins; later calls are no-ops.
    pub fn close(&self, reason: CloseReason) {
        let mut inner = self.inner.lock();
        if inner.closed.is_none() {
            inner.closed = Some(reason);
        }
        drop(inner);
        self.ready.notify_all();
    }

    /// Scans currently buffered, including not-yet-materialized losses
    pub fn host_backlog(&self) -> u64 {
        let inner = self.inner.lock();
        inner.queued_scans(self.channels) as u64 + inner.pending_lost_scans
    }

    /// Total scans lost to host-side overflow since creation
    pub fn total_lost(&self) -> u64 {
        self.inner.lock().total_lost_scans
    }

    /// Configured capacity in scans
    pub fn capacity_scans(&self) -> usize {
        self.capacity_scans
    }

    /// Channels per scan
    pub fn channels(&self) -> usize {
        self.channels
    }

    fn flush_pending(&self, inner: &mut Inner) {
        while inner.pending_lost_scans > 0
            && inner.queued_scans(self.channels) < self.capacity_scans
        {
            inner
                .samples
                .extend(std::iter::repeat(SENTINEL_VALUE).take(self.channels));
            inner.pending_lost_scans -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn scan(base: f64, channels: usize) -> Vec<f64> {
        (0..channels).map(|c| base + c as f64 / 10.0).collect()
    }

    #[test]
    fn test_batch_is_exact_and_ordered() {
        let buffer = ScanBuffer::new(2, 16);
        for i in 0..5 {
            buffer.enqueue(&scan(i as f64, 2));
        }

        let (data, backlog) = buffer.dequeue_batch(3).unwrap();
        assert_eq!(data, vec![0.0, 0.1, 1.0, 1.1, 2.0, 2.1]);
        assert_eq!(backlog, 2);
        assert_eq!(buffer.host_backlog(), 2);
    }

    #[test]
    fn test_blocking_dequeue_wakes_on_data() {
        let buffer = Arc::new(ScanBuffer::new(1, 16));
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.dequeue_batch(4))
        };

        thread::sleep(Duration::from_millis(20));
        for i in 0..4 {
            buffer.enqueue(&[i as f64]);
        }

        let (data, backlog) = consumer.join().unwrap().unwrap();
        assert_eq!(data, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(backlog, 0);
    }

    #[test]
    fn test_overflow_tags_sentinels_in_order() {
        let buffer = ScanBuffer::new(1, 4);
        for i in 0..7 {
            buffer.enqueue(&[i as f64]);
        }

        // Four real scans fit; three were lost and are reported in backlog
        assert_eq!(buffer.host_backlog(), 7);
        assert_eq!(buffer.total_lost(), 3);

        let (data, _) = buffer.dequeue_batch(4).unwrap();
        assert_eq!(data, vec![0.0, 1.0, 2.0, 3.0]);

        // The losses surface as sentinel scans after the data they followed
        let (data, backlog) = buffer.dequeue_batch(3).unwrap();
        assert!(data.iter().all(|&v| v == SENTINEL_VALUE));
        assert_eq!(backlog, 0);
    }

    #[test]
    fn test_data_after_overflow_keeps_arrival_order() {
        let buffer = ScanBuffer::new(1, 4);
        // Scans 0..4 fill the buffer; scans 4 and 5 arrive while full
        for i in 0..6 {
            buffer.enqueue(&[i as f64]);
        }
        // Drain three scans so both losses materialize and space frees up
        let (first, _) = buffer.dequeue_batch(3).unwrap();
        assert_eq!(first, vec![0.0, 1.0, 2.0]);
        buffer.enqueue(&[6.0]);

        let (data, backlog) = buffer.dequeue_batch(4).unwrap();
        // Old data, then the two tagged losses, then the newer scan
        assert_eq!(data, vec![3.0, SENTINEL_VALUE, SENTINEL_VALUE, 6.0]);
        assert_eq!(backlog, 0);
        assert_eq!(buffer.total_lost(), 2);
    }

    #[test]
    fn test_close_releases_blocked_consumer() {
        let buffer = Arc::new(ScanBuffer::new(1, 16));
        let consumer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.dequeue_batch(4))
        };

        thread::sleep(Duration::from_millis(20));
        buffer.close(CloseReason::Stopped);

        assert_eq!(consumer.join().unwrap(), Err(CloseReason::Stopped));
    }

    #[test]
    fn test_no_partial_batch_after_close() {
        let buffer = ScanBuffer::new(1, 16);
        buffer.enqueue(&[1.0]);
        buffer.enqueue(&[2.0]);
        buffer.close(CloseReason::LinkLost);

        // Two scans are present but the batch needs four
        assert_eq!(buffer.dequeue_batch(4), Err(CloseReason::LinkLost));
        // A batch that does fit is still delivered after close
        let (data, _) = buffer.dequeue_batch(2).unwrap();
        assert_eq!(data, vec![1.0, 2.0]);
    }

    #[test]
    fn test_first_close_reason_wins() {
        let buffer = ScanBuffer::new(1, 4);
        buffer.close(CloseReason::LinkLost);
        buffer.close(CloseReason::Stopped);
        assert_eq!(buffer.dequeue_batch(1), Err(CloseReason::LinkLost));
    }

    #[test]
    fn test_enqueue_after_close_is_discarded() {
        let buffer = ScanBuffer::new(1, 4);
        buffer.close(CloseReason::Stopped);
        buffer.enqueue(&[1.0]);
        assert_eq!(buffer.host_backlog(), 0);
    }
}
