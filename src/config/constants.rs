// src/config/constants.rs
//! System-wide constants for the streaming core

/// Stream data-path constants
pub mod stream {
    /// Reserved value marking a sample lost to buffer overflow.
    ///
    /// Matches the device-side overflow convention so consumers scan a
    /// single sentinel regardless of where the loss occurred.
    pub const SENTINEL_VALUE: f64 = -9999.0;

    /// Default number of batches the host-side buffer holds
    pub const DEFAULT_BUFFER_BATCHES: usize = 8;

    /// Floor on the host-side buffer capacity in scans
    pub const MIN_BUFFER_SCANS: usize = 64;

    /// Upper bound on channels per scan accepted at configuration time
    pub const MAX_CHANNELS: usize = 128;

    /// Default ceiling for one `stream_burst` collection
    pub const DEFAULT_MAX_BURST_SCANS: usize = 1_000_000;
}

/// Timing and pacing constants
pub mod timing {
    /// Microseconds per second
    pub const MICROS_PER_SECOND: u64 = 1_000_000;

    /// Dampening factor applied by the backpressure pacer.
    ///
    /// The pacer never sleeps the full time remaining until the next batch;
    /// sleeping at most this fraction keeps the consumer responsive when the
    /// device runs slightly fast.
    pub const BACKLOG_DAMPENING: f64 = 0.9;

    /// Shortest pause between transport worker poll cycles
    pub const MIN_WORKER_POLL_MICROS: u64 = 500;

    /// Longest pause between transport worker poll cycles
    pub const MAX_WORKER_POLL_MICROS: u64 = 100_000;

    /// Default divisor of the batch period for worker poll pacing
    pub const DEFAULT_WORKER_POLL_DIVISOR: u32 = 4;
}

/// Transport defaults used by the simulated device
pub mod transport {
    /// Largest single stream-out transfer in samples
    pub const DEFAULT_MAX_TRANSFER_SAMPLES: usize = 512;

    /// Device base clock the scan rate is divided down from
    pub const DEFAULT_BASE_CLOCK_HZ: f64 = 100_000.0;

    /// Aggregate sample throughput ceiling (rate x channels)
    pub const DEFAULT_MAX_SAMPLE_THROUGHPUT: f64 = 200_000.0;

    /// Device-side scan buffer depth
    pub const DEFAULT_DEVICE_BUFFER_SCANS: usize = 4096;
}
