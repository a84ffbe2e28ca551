// src/stream/stream_out.rs
//! Double-buffered waveform output management
//!
//! Each output register carries a device-side buffer split in two: the half
//! the device is playing (the armed loop) and the half the host is free to
//! write. A refill writes the inactive phase in bounded chunks, arms the
//! loop, and rotates the phase index. Missing a refill deadline makes the
//! device repeat the last armed phase, so late hosts degrade to a held
//! waveform instead of a glitch.
//!
//! Waveform synthesis lives outside this module; the manager only owns
//! transfer and rotation.

use crate::error::{StreamError, StreamResult};
use crate::transport::{StreamTransport, TransportError};
use serde::{Deserialize, Serialize};

/// Configuration of one continuously driven output register
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StreamOutConfig {
    /// Output register the waveform is played on
    pub target_register: u32,
    /// Device-side buffer allocation in bytes
    pub buffer_capacity_bytes: u32,
    /// Samples in one playback loop
    pub loop_size: usize,
    /// Device sample width used to size the buffer
    pub bytes_per_sample: usize,
}

impl StreamOutConfig {
    /// Samples the device-side buffer can hold
    pub fn capacity_samples(&self) -> usize {
        if self.bytes_per_sample == 0 {
            return 0;
        }
        self.buffer_capacity_bytes as usize / self.bytes_per_sample
    }

    /// Largest loop that still leaves room for the inactive phase
    pub fn max_loop_size(&self) -> usize {
        self.capacity_samples() / 2
    }

    /// Check the double-buffering invariant
    pub fn validate(&self) -> StreamResult<()> {
        if self.bytes_per_sample == 0 {
            return Err(StreamError::InvalidConfiguration {
                reason: "bytes_per_sample must be positive".to_string(),
            });
        }
        if self.loop_size == 0 {
            return Err(StreamError::InvalidConfiguration {
                reason: "loop_size must be positive".to_string(),
            });
        }
        // Writing the next phase must never reach into samples the device
        // has not finished playing
        if self.loop_size > self.max_loop_size() {
            return Err(StreamError::LoopTooLarge {
                loop_size: self.loop_size,
                max_loop_size: self.max_loop_size(),
            });
        }
        Ok(())
    }
}

/// Double-buffered waveform state of one output register
#[derive(Debug)]
pub struct StreamOutChannel {
    config: StreamOutConfig,
    phases: [Vec<f64>; 2],
    current_phase: usize,
    refill_count: u64,
}

impl StreamOutChannel {
    /// Build a channel holding two waveform phases
    pub fn new(config: StreamOutConfig, phase0: Vec<f64>, phase1: Vec<f64>) -> StreamResult<Self> {
        config.validate()?;
        for phase in [&phase0, &phase1] {
            Self::check_phase(&config, phase)?;
        }
        Ok(Self {
            config,
            phases: [phase0, phase1],
            current_phase: 0,
            refill_count: 0,
        })
    }

    /// Allocate the device buffer and arm phase 0.
    ///
    /// Must run before the owning stream session starts; the device consults
    /// the output buffer state the moment scanning begins.
    pub(crate) fn initialize(
        &mut self,
        transport: &mut dyn StreamTransport,
    ) -> Result<(), TransportError> {
        transport.configure_stream_out(
            self.config.target_register,
            self.config.buffer_capacity_bytes,
        )?;
        self.write_phase(transport, 0)?;
        transport.arm_output_loop(self.config.target_register, self.phases[0].len())?;
        self.current_phase = 0;
        Ok(())
    }

    /// Transfer the inactive phase, arm it, and rotate.
    ///
    /// Chunks never exceed the transport's single-transfer limit and are
    /// written in order under one transport lock, so refills never
    /// interleave.
    pub(crate) fn refill(
        &mut self,
        transport: &mut dyn StreamTransport,
    ) -> Result<(), TransportError> {
        let inactive = 1 - self.current_phase;
        self.write_phase(transport, inactive)?;
        transport.arm_output_loop(self.config.target_register, self.phases[inactive].len())?;
        self.current_phase = inactive;
        self.refill_count += 1;
        Ok(())
    }

    /// Replace a phase's samples (external waveform synthesis feeds this)
    pub fn set_phase(&mut self, phase_index: usize, samples: Vec<f64>) -> StreamResult<()> {
        if phase_index > 1 {
            return Err(StreamError::InvalidConfiguration {
                reason: format!("phase index {} out of range (0 or 1)", phase_index),
            });
        }
        Self::check_phase(&self.config, &samples)?;
        self.phases[phase_index] = samples;
        Ok(())
    }

    /// Phase most recently armed on the device
    pub fn current_phase(&self) -> usize {
        self.current_phase
    }

    /// Completed refills since initialization
    pub fn refill_count(&self) -> u64 {
        self.refill_count
    }

    /// Channel configuration
    pub fn config(&self) -> &StreamOutConfig {
        &self.config
    }

    fn check_phase(config: &StreamOutConfig, samples: &[f64]) -> StreamResult<()> {
        if samples.is_empty() {
            return Err(StreamError::InvalidConfiguration {
                reason: "waveform phase must not be empty".to_string(),
            });
        }
        if samples.len() > config.loop_size {
            return Err(StreamError::PhaseTooLong {
                samples: samples.len(),
                loop_size: config.loop_size,
            });
        }
        Ok(())
    }

    fn write_phase(
        &self,
        transport: &mut dyn StreamTransport,
        phase_index: usize,
    ) -> Result<(), TransportError> {
        let max_chunk = transport.max_transfer_samples().max(1);
        for chunk in self.phases[phase_index].chunks(max_chunk) {
            transport.write_output_buffer(self.config.target_register, chunk)?;
        }
        Ok(())
    }
}
