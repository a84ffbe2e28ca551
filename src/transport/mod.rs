// src/transport/mod.rs
//! Transport seam between the streaming core and the physical device
//!
//! The core drives a [`StreamTransport`] as a set of blocking primitives and
//! never sees the wire format underneath (addressing, framing, checksums are
//! the transport's business). One implementation ships with the crate: a
//! deterministic simulated device behind the `simulation` feature.

#[cfg(feature = "simulation")]
pub mod simulator;

#[cfg(feature = "simulation")]
pub use simulator::{SimulatedTransport, SimulatorConfig};

use thiserror::Error;

/// Scans pulled from the device in one fetch.
///
/// `data` holds whole scans only, channel-interleaved in the order the scan
/// list was configured. `device_backlog` counts scans still buffered on the
/// device after this fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchedScans {
    /// Channel-interleaved sample values, a multiple of the channel count
    pub data: Vec<f64>,
    /// Scans remaining in the device-side buffer
    pub device_backlog: u64,
}

/// Faults a transport can report
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The device refused the request (infeasible rate, bad register, ...)
    #[error("device rejected the request: {reason}")]
    Rejected {
        /// Device-reported cause
        reason: String,
    },

    /// The physical link went away mid-operation
    #[error("device link lost: {reason}")]
    LinkLost {
        /// Failure cause
        reason: String,
    },

    /// The device answered outside the protocol contract
    #[error("protocol violation: {reason}")]
    Protocol {
        /// What was malformed
        reason: String,
    },
}

/// Blocking I/O primitives of a streaming-capable device connection.
///
/// Implementations are driven from one worker thread per session; calls on
/// the same transport are serialized by the core. `begin_scanning` may coerce
/// the requested rate to the device's clock divisors and must report the
/// rate actually in effect.
pub trait StreamTransport: Send {
    /// Start hardware-timed scanning of `channels` at `scan_rate` scans/s.
    ///
    /// Returns the actual scan rate the device settled on.
    fn begin_scanning(&mut self, channels: &[u32], scan_rate: f64)
        -> Result<f64, TransportError>;

    /// Pull every complete scan currently available from the device
    fn fetch_available_scans(&mut self) -> Result<FetchedScans, TransportError>;

    /// Stop hardware-timed scanning
    fn end_scanning(&mut self) -> Result<(), TransportError>;

    /// Allocate a device-side output buffer on `target`
    fn configure_stream_out(&mut self, target: u32, capacity_bytes: u32)
        -> Result<(), TransportError>;

    /// Append samples to the output buffer on `target`.
    ///
    /// A single call must not exceed [`max_transfer_samples`](Self::max_transfer_samples).
    fn write_output_buffer(&mut self, target: u32, samples: &[f64])
        -> Result<(), TransportError>;

    /// Arm the playback loop on `target` to the most recently written
    /// `loop_size` samples
    fn arm_output_loop(&mut self, target: u32, loop_size: usize) -> Result<(), TransportError>;

    /// Largest sample count a single output transfer may carry
    fn max_transfer_samples(&self) -> usize;
}
