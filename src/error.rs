// src/error.rs
//! Closed error taxonomy for the streaming core
//!
//! Every fallible public operation returns [`StreamError`]. Caller misuse
//! (wrong state, duplicate or unknown handles, concurrent readers) is
//! detected synchronously and never retried. Transport faults are translated
//! at the facade boundary; data loss is reported through sentinel values and
//! backlog counters, never as an error.

use crate::transport::TransportError;
use thiserror::Error;

/// Result alias for streaming core operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors surfaced by the streaming core
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StreamError {
    /// A stream session is already active on this device handle
    #[error("stream already running on device {handle}")]
    AlreadyRunning {
        /// Device connection handle
        handle: i32,
    },

    /// The operation requires a running stream session
    #[error("no stream running on device {handle}")]
    NotRunning {
        /// Device connection handle
        handle: i32,
    },

    /// The device handle has no attached transport
    #[error("unknown device handle {handle}")]
    UnknownDevice {
        /// Device connection handle
        handle: i32,
    },

    /// A transport is already attached under this device handle
    #[error("device handle {handle} is already attached")]
    DuplicateDevice {
        /// Device connection handle
        handle: i32,
    },

    /// An interval timer is already active under this handle
    #[error("interval handle {handle} is already active")]
    DuplicateHandle {
        /// Interval timer handle
        handle: i32,
    },

    /// The interval timer handle was never started or has been cleaned
    #[error("interval handle {handle} is not active")]
    InvalidHandle {
        /// Interval timer handle
        handle: i32,
    },

    /// A second reader attempted to block on the same session
    #[error("another reader is already active on device {handle}")]
    ConcurrentAccess {
        /// Device connection handle
        handle: i32,
    },

    /// The requested configuration is malformed
    #[error("invalid stream configuration: {reason}")]
    InvalidConfiguration {
        /// Human-readable rejection cause
        reason: String,
    },

    /// The device refused the requested stream configuration
    #[error("device {handle} rejected the configuration: {reason}")]
    DeviceRejected {
        /// Device connection handle
        handle: i32,
        /// Device-reported rejection cause
        reason: String,
    },

    /// The physical link to the device was lost mid-stream
    #[error("communication with device {handle} lost: {reason}")]
    DeviceCommunication {
        /// Device connection handle
        handle: i32,
        /// Transport-reported failure cause
        reason: String,
    },

    /// The session was stopped while a call was blocked on it
    #[error("stream on device {handle} stopped while a call was blocked")]
    SessionStopped {
        /// Device connection handle
        handle: i32,
    },

    /// A stream-out channel is already initialized on this register
    #[error("stream-out already initialized on register {target} of device {handle}")]
    StreamOutExists {
        /// Device connection handle
        handle: i32,
        /// Target output register address
        target: u32,
    },

    /// No stream-out channel is initialized on this register
    #[error("no stream-out initialized on register {target} of device {handle}")]
    StreamOutUnknown {
        /// Device connection handle
        handle: i32,
        /// Target output register address
        target: u32,
    },

    /// The playback loop does not leave room for the inactive phase
    #[error("loop of {loop_size} samples exceeds half the device buffer ({max_loop_size} samples)")]
    LoopTooLarge {
        /// Requested loop length in samples
        loop_size: usize,
        /// Largest loop the buffer can double-buffer
        max_loop_size: usize,
    },

    /// A waveform phase is longer than the configured loop
    #[error("phase of {samples} samples exceeds loop size {loop_size}")]
    PhaseTooLong {
        /// Offending phase length in samples
        samples: usize,
        /// Configured loop length
        loop_size: usize,
    },
}

impl StreamError {
    /// Translate a transport fault into the facade taxonomy
    pub(crate) fn from_transport(handle: i32, err: TransportError) -> Self {
        match err {
            TransportError::Rejected { reason } => StreamError::DeviceRejected { handle, reason },
            TransportError::LinkLost { reason } => {
                StreamError::DeviceCommunication { handle, reason }
            }
            TransportError::Protocol { reason } => {
                StreamError::DeviceCommunication { handle, reason }
            }
        }
    }
}
