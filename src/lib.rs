//! DAQ-Core: continuous streaming acquisition for measurement devices
//!
//! This library is the host-side engine for hardware-timed, multi-channel
//! data acquisition. It features:
//!
//! - Start/read/stop stream sessions with backlog accounting
//! - A host-side scan buffer that tags overflow with sentinel values
//! - Callback-based delivery as an alternative to polling
//! - Double-buffered stream-out for gapless waveform playback
//! - Drift-free interval timers and backlog-aware poll pacing
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use daq_core::{MonotonicClock, StreamController};
//! use daq_core::transport::{SimulatedTransport, SimulatorConfig};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let clock = Arc::new(MonotonicClock::new());
//!     let controller = StreamController::new(clock.clone());
//!
//!     let transport = SimulatedTransport::new(SimulatorConfig::default(), clock);
//!     controller.attach_device(1, Box::new(transport))?;
//!
//!     // Two channels at 1 kHz, 500 scans per read
//!     let actual_rate = controller.start_stream(1, &[0, 2], 500, 1000.0)?;
//!     println!("streaming at {} scans/s", actual_rate);
//!
//!     for _ in 0..10 {
//!         let batch = controller.read_stream(1)?;
//!         println!(
//!             "got {} samples, backlog {}/{}",
//!             batch.data.len(),
//!             batch.device_backlog,
//!             batch.host_backlog
//!         );
//!     }
//!
//!     controller.stop_stream(1)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod stream;
pub mod timing;
pub mod transport;
pub mod utils;

// Re-export commonly used types for convenience
pub use error::{StreamError, StreamResult};
pub use stream::{
    CloseReason, DeviceHandle, ScanBatch, ScanBuffer, SessionInfo, SessionState, StreamCallback,
    StreamController, StreamOutChannel, StreamOutConfig,
};
pub use timing::{next_poll_delay, IntervalRegistry};
pub use transport::{FetchedScans, StreamTransport, TransportError};
pub use utils::time::{ClockSource, MockClock, MonotonicClock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(NAME, "daq-core");
    }
}
