// src/transport/simulator.rs
//! Deterministic simulated device transport
//!
//! Produces a clock-driven ramp signal in which every sample value encodes
//! its absolute scan index and channel position, so tests can verify
//! acquisition order end to end. Rate coercion, throughput rejection,
//! device-side overflow, stream-out buffering, and link loss are all
//! modeled; no hardware required.

use crate::config::constants::stream::SENTINEL_VALUE;
use crate::config::constants::transport as transport_defaults;
use crate::transport::{FetchedScans, StreamTransport, TransportError};
use crate::utils::time::ClockSource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Simulated device configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulatorConfig {
    /// Device base clock the scan rate is divided down from
    pub base_clock_hz: f64,
    /// Aggregate sample throughput ceiling (`rate * channels`)
    pub max_sample_throughput: f64,
    /// Device-side scan buffer depth before overflow tagging
    pub device_buffer_scans: usize,
    /// Largest single stream-out transfer accepted
    pub max_transfer_samples: usize,
    /// Uniform noise amplitude added to each sample (0.0 = exact ramp)
    pub noise_level: f64,
    /// Drop the link after this many scans have been produced
    pub fail_after_scans: Option<u64>,
    /// Seed for the noise generator
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            base_clock_hz: transport_defaults::DEFAULT_BASE_CLOCK_HZ,
            max_sample_throughput: transport_defaults::DEFAULT_MAX_SAMPLE_THROUGHPUT,
            device_buffer_scans: transport_defaults::DEFAULT_DEVICE_BUFFER_SCANS,
            max_transfer_samples: transport_defaults::DEFAULT_MAX_TRANSFER_SAMPLES,
            noise_level: 0.0,
            fail_after_scans: None,
            seed: 0,
        }
    }
}

struct OutBuffer {
    capacity_samples: usize,
    total_written: u64,
    written_since_arm: usize,
    armed_loop: usize,
    // Transfer sizes since configure, newest last
    transfer_log: Vec<usize>,
}

/// Clock-driven simulated device
pub struct SimulatedTransport {
    config: SimulatorConfig,
    clock: Arc<dyn ClockSource>,
    rng: StdRng,

    scanning: bool,
    channel_count: usize,
    actual_rate: f64,
    scan_origin_micros: u64,
    scans_delivered: u64,
    scans_lost: u64,

    out_buffers: HashMap<u32, OutBuffer>,
}

impl SimulatedTransport {
    /// Create a simulated transport paced by `clock`
    pub fn new(config: SimulatorConfig, clock: Arc<dyn ClockSource>) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            clock,
            rng,
            scanning: false,
            channel_count: 0,
            actual_rate: 0.0,
            scan_origin_micros: 0,
            scans_delivered: 0,
            scans_lost: 0,
            out_buffers: HashMap::new(),
        }
    }

    /// Total scans lost to simulated device-side overflow
    pub fn scans_lost(&self) -> u64 {
        self.scans_lost
    }

    /// Transfer sizes recorded on an output register since configuration
    pub fn transfer_log(&self, target: u32) -> Option<&[usize]> {
        self.out_buffers.get(&target).map(|b| b.transfer_log.as_slice())
    }

    fn sample_value(&mut self, scan_index: u64, channel: usize) -> f64 {
        let base = (scan_index * self.channel_count as u64 + channel as u64) as f64;
        if self.config.noise_level > 0.0 {
            base + self.rng.gen_range(-self.config.noise_level..self.config.noise_level)
        } else {
            base
        }
    }
}

impl StreamTransport for SimulatedTransport {
    fn begin_scanning(
        &mut self,
        channels: &[u32],
        scan_rate: f64,
    ) -> Result<f64, TransportError> {
        if self.scanning {
            return Err(TransportError::Rejected {
                reason: "device is already scanning".to_string(),
            });
        }
        if channels.is_empty() {
            return Err(TransportError::Rejected {
                reason: "empty scan list".to_string(),
            });
        }
        if scan_rate.is_nan() || scan_rate <= 0.0 {
            return Err(TransportError::Rejected {
                reason: format!("scan rate {} is not positive", scan_rate),
            });
        }
        if scan_rate * channels.len() as f64 > self.config.max_sample_throughput {
            return Err(TransportError::Rejected {
                reason: format!(
                    "{} channels at {} scans/s exceeds {} samples/s",
                    channels.len(),
                    scan_rate,
                    self.config.max_sample_throughput
                ),
            });
        }

        // Quantize to the nearest achievable clock divisor, never above the
        // requested rate
        let divisor = (self.config.base_clock_hz / scan_rate).ceil().max(1.0);
        self.actual_rate = self.config.base_clock_hz / divisor;

        self.scanning = true;
        self.channel_count = channels.len();
        self.scan_origin_micros = self.clock.now_micros();
        self.scans_delivered = 0;
        self.scans_lost = 0;
        Ok(self.actual_rate)
    }

    fn fetch_available_scans(&mut self) -> Result<FetchedScans, TransportError> {
        if !self.scanning {
            return Err(TransportError::Rejected {
                reason: "device is not scanning".to_string(),
            });
        }

        let elapsed_micros = self
            .clock
            .now_micros()
            .saturating_sub(self.scan_origin_micros);
        let produced = (elapsed_micros as f64 / 1_000_000.0 * self.actual_rate) as u64;

        if let Some(limit) = self.config.fail_after_scans {
            if produced >= limit {
                self.scanning = false;
                return Err(TransportError::LinkLost {
                    reason: "simulated link drop".to_string(),
                });
            }
        }

        let pending = produced.saturating_sub(self.scans_delivered);
        // Scans beyond the device buffer depth were overwritten on the
        // device; they come back as sentinel-filled scans
        let lost = pending.saturating_sub(self.config.device_buffer_scans as u64);
        self.scans_lost += lost;

        let mut data = Vec::with_capacity(pending as usize * self.channel_count);
        for index in self.scans_delivered..produced {
            if index < self.scans_delivered + lost {
                data.extend(std::iter::repeat(SENTINEL_VALUE).take(self.channel_count));
            } else {
                for channel in 0..self.channel_count {
                    data.push(self.sample_value(index, channel));
                }
            }
        }
        self.scans_delivered = produced;

        Ok(FetchedScans {
            data,
            device_backlog: 0,
        })
    }

    fn end_scanning(&mut self) -> Result<(), TransportError> {
        self.scanning = false;
        Ok(())
    }

    fn configure_stream_out(
        &mut self,
        target: u32,
        capacity_bytes: u32,
    ) -> Result<(), TransportError> {
        let capacity_samples = capacity_bytes as usize / std::mem::size_of::<f64>();
        if capacity_samples == 0 {
            return Err(TransportError::Rejected {
                reason: format!("buffer of {} bytes holds no samples", capacity_bytes),
            });
        }
        self.out_buffers.insert(
            target,
            OutBuffer {
                capacity_samples,
                total_written: 0,
                written_since_arm: 0,
                armed_loop: 0,
                transfer_log: Vec::new(),
            },
        );
        Ok(())
    }

    fn write_output_buffer(
        &mut self,
        target: u32,
        samples: &[f64],
    ) -> Result<(), TransportError> {
        if samples.len() > self.config.max_transfer_samples {
            return Err(TransportError::Protocol {
                reason: format!(
                    "transfer of {} samples exceeds frame limit {}",
                    samples.len(),
                    self.config.max_transfer_samples
                ),
            });
        }
        let buffer = self.out_buffers.get_mut(&target).ok_or_else(|| {
            TransportError::Rejected {
                reason: format!("register {} has no output buffer", target),
            }
        })?;

        // The armed loop is still being played; writes that would reach into
        // it corrupt playback
        if buffer.armed_loop + buffer.written_since_arm + samples.len()
            > buffer.capacity_samples
        {
            return Err(TransportError::Protocol {
                reason: format!(
                    "write of {} samples overruns the playing region ({} armed, {} staged, {} capacity)",
                    samples.len(),
                    buffer.armed_loop,
                    buffer.written_since_arm,
                    buffer.capacity_samples
                ),
            });
        }

        buffer.total_written += samples.len() as u64;
        buffer.written_since_arm += samples.len();
        buffer.transfer_log.push(samples.len());
        Ok(())
    }

    fn arm_output_loop(&mut self, target: u32, loop_size: usize) -> Result<(), TransportError> {
        let buffer = self.out_buffers.get_mut(&target).ok_or_else(|| {
            TransportError::Rejected {
                reason: format!("register {} has no output buffer", target),
            }
        })?;
        if (loop_size as u64) > buffer.total_written {
            return Err(TransportError::Rejected {
                reason: format!(
                    "loop of {} samples armed before {} were written",
                    loop_size, buffer.total_written
                ),
            });
        }
        buffer.armed_loop = loop_size;
        buffer.written_since_arm = 0;
        Ok(())
    }

    fn max_transfer_samples(&self) -> usize {
        self.config.max_transfer_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::time::MockClock;

    fn transport_with_clock() -> (SimulatedTransport, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new(0));
        let transport = SimulatedTransport::new(SimulatorConfig::default(), clock.clone());
        (transport, clock)
    }

    #[test]
    fn test_rate_quantization() {
        let (mut transport, _clock) = transport_with_clock();
        // 100 kHz base / 3 Hz requested -> divisor 33334 -> just under 3 Hz
        let actual = transport.begin_scanning(&[0, 2], 3.0).unwrap();
        assert!(actual <= 3.0);
        assert!(actual > 2.9);

        // Exact divisors come back unchanged
        transport.end_scanning().unwrap();
        let actual = transport.begin_scanning(&[0, 2], 1000.0).unwrap();
        assert_eq!(actual, 1000.0);
    }

    #[test]
    fn test_throughput_rejection() {
        let (mut transport, _clock) = transport_with_clock();
        let channels: Vec<u32> = (0..8).collect();
        let err = transport.begin_scanning(&channels, 50_000.0).unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
    }

    #[test]
    fn test_ramp_encodes_scan_and_channel_order() {
        let (mut transport, clock) = transport_with_clock();
        transport.begin_scanning(&[0, 2, 4], 1000.0).unwrap();

        // 5 ms at 1 kHz -> 5 scans of 3 channels
        clock.advance_by(5_000);
        let fetched = transport.fetch_available_scans().unwrap();
        assert_eq!(fetched.data.len(), 15);
        for (position, &value) in fetched.data.iter().enumerate() {
            assert_eq!(value, position as f64);
        }

        // Nothing new until the clock moves
        let fetched = transport.fetch_available_scans().unwrap();
        assert!(fetched.data.is_empty());

        // The ramp continues from the global scan index
        clock.advance_by(2_000);
        let fetched = transport.fetch_available_scans().unwrap();
        assert_eq!(fetched.data.len(), 6);
        assert_eq!(fetched.data[0], 15.0);
    }

    #[test]
    fn test_device_overflow_emits_sentinels() {
        let clock = Arc::new(MockClock::new(0));
        let config = SimulatorConfig {
            device_buffer_scans: 4,
            ..Default::default()
        };
        let mut transport = SimulatedTransport::new(config, clock.clone());
        transport.begin_scanning(&[0], 1000.0).unwrap();

        // 10 scans elapsed but the device only holds 4: oldest 6 are lost
        clock.advance_by(10_000);
        let fetched = transport.fetch_available_scans().unwrap();
        assert_eq!(fetched.data.len(), 10);
        assert!(fetched.data[..6].iter().all(|&v| v == SENTINEL_VALUE));
        assert!(fetched.data[6..].iter().all(|&v| v != SENTINEL_VALUE));
        assert_eq!(transport.scans_lost(), 6);
    }

    #[test]
    fn test_link_failure_injection() {
        let clock = Arc::new(MockClock::new(0));
        let config = SimulatorConfig {
            fail_after_scans: Some(5),
            ..Default::default()
        };
        let mut transport = SimulatedTransport::new(config, clock.clone());
        transport.begin_scanning(&[0], 1000.0).unwrap();

        clock.advance_by(10_000);
        let err = transport.fetch_available_scans().unwrap_err();
        assert!(matches!(err, TransportError::LinkLost { .. }));
    }

    #[test]
    fn test_stream_out_guards() {
        let (mut transport, _clock) = transport_with_clock();
        // 64 samples capacity
        transport.configure_stream_out(30_000, 512).unwrap();

        transport
            .write_output_buffer(30_000, &vec![0.5; 32])
            .unwrap();
        transport.arm_output_loop(30_000, 32).unwrap();

        // The next phase fits alongside the armed loop
        transport
            .write_output_buffer(30_000, &vec![0.7; 32])
            .unwrap();

        // A third phase would overrun the playing region
        let err = transport
            .write_output_buffer(30_000, &vec![0.9; 32])
            .unwrap_err();
        assert!(matches!(err, TransportError::Protocol { .. }));

        // Oversized single transfers are refused outright
        let oversized = vec![0.0; transport.max_transfer_samples() + 1];
        let err = transport.write_output_buffer(30_000, &oversized).unwrap_err();
        assert!(matches!(err, TransportError::Protocol { .. }));
    }
}
