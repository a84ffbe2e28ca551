// src/stream/controller.rs
//! Public facade over the streaming core
//!
//! Composes the registry, host-side buffer, callback dispatcher, stream-out
//! manager, and pacing utilities into the documented start/read/stop/burst
//! contract. One transport worker thread runs per active session; facade
//! calls are safe from any thread.

use crate::config::constants::{stream as stream_consts, timing as timing_consts};
use crate::config::CoreSettings;
use crate::error::{StreamError, StreamResult};
use crate::stream::callback::{CallbackDispatcher, StreamCallback};
use crate::stream::registry::{
    ActiveSession, DeviceEntry, DeviceHandle, SessionShared, SessionState, StreamRegistry,
};
use crate::stream::scan_buffer::{CloseReason, ScanBuffer};
use crate::stream::stream_out::{StreamOutChannel, StreamOutConfig};
use crate::timing::pacer::next_poll_delay;
use crate::transport::{StreamTransport, TransportError};
use crate::utils::time::ClockSource;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Scans delivered by one `read_stream` call, with backlog counters.
///
/// `data` is channel-interleaved: scan 0's channels in configured order,
/// then scan 1's, and so on. Lost scans appear as
/// [`SENTINEL_VALUE`](crate::config::constants::stream::SENTINEL_VALUE)
/// samples; counting them quantifies the loss.
#[derive(Debug, Clone)]
pub struct ScanBatch {
    /// Channel-interleaved sample values
    pub data: Vec<f64>,
    /// Scans buffered on the device after this read
    pub device_backlog: u64,
    /// Scans remaining in the host buffer after this read
    pub host_backlog: u64,
}

/// Read-only snapshot of a session for monitoring
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Lifecycle state at snapshot time
    pub state: SessionState,
    /// Configured scan list
    pub channel_list: Vec<u32>,
    /// Scans per read batch
    pub scans_per_read: usize,
    /// Rate the caller asked for
    pub requested_scan_rate: f64,
    /// Rate the device settled on
    pub actual_scan_rate: f64,
    /// Scans currently buffered host-side
    pub host_backlog: u64,
    /// Scans currently buffered device-side
    pub device_backlog: u64,
    /// Scans lost to host-side overflow since start
    pub scans_lost: u64,
}

/// Entry point for continuous streaming against attached devices
pub struct StreamController {
    registry: StreamRegistry,
    settings: CoreSettings,
    clock: Arc<dyn ClockSource>,
}

impl StreamController {
    /// Create a controller with default settings
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self::with_settings(CoreSettings::default(), clock)
    }

    /// Create a controller with explicit settings
    pub fn with_settings(settings: CoreSettings, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            registry: StreamRegistry::new(),
            settings,
            clock,
        }
    }

    /// Bind a device connection to `handle`
    pub fn attach_device(
        &self,
        handle: DeviceHandle,
        transport: Box<dyn StreamTransport>,
    ) -> StreamResult<()> {
        self.registry.attach(handle, transport)?;
        tracing::debug!(device = handle, "device attached");
        Ok(())
    }

    /// Remove a device, stopping any running session first
    pub fn detach_device(&self, handle: DeviceHandle) -> StreamResult<()> {
        self.registry.get(handle)?;
        self.stop_stream(handle)?;
        self.registry.detach(handle)?;
        tracing::debug!(device = handle, "device detached");
        Ok(())
    }

    /// Number of attached devices
    pub fn attached_devices(&self) -> usize {
        self.registry.attached_count()
    }

    /// Start continuous scanning of `channel_list` at `scan_rate` scans/s.
    ///
    /// Returns the actual scan rate the device settled on, which may be
    /// below the request when the device quantizes to its clock divisors.
    pub fn start_stream(
        &self,
        handle: DeviceHandle,
        channel_list: &[u32],
        scans_per_read: usize,
        scan_rate: f64,
    ) -> StreamResult<f64> {
        let entry = self.registry.get(handle)?;
        {
            let mut state = entry.state.lock();
            if *state != SessionState::Stopped {
                return Err(StreamError::AlreadyRunning { handle });
            }
            *state = SessionState::Starting;
        }

        match self.start_stream_inner(&entry, channel_list, scans_per_read, scan_rate) {
            Ok(actual_rate) => {
                *entry.state.lock() = SessionState::Running;
                tracing::info!(
                    device = handle,
                    channels = channel_list.len(),
                    scans_per_read,
                    requested_rate = scan_rate,
                    actual_rate,
                    "stream started"
                );
                Ok(actual_rate)
            }
            Err(err) => {
                *entry.state.lock() = SessionState::Stopped;
                Err(err)
            }
        }
    }

    /// Block until one full batch is available and return it.
    ///
    /// At most one reader may block per session; a second concurrent call
    /// fails with `ConcurrentAccess`. After a link loss the remaining
    /// buffered batches drain first, then `DeviceCommunication` surfaces.
    pub fn read_stream(&self, handle: DeviceHandle) -> StreamResult<ScanBatch> {
        let entry = self.registry.get(handle)?;
        let (buffer, shared, scans_per_read) = {
            let session = entry.session.lock();
            match session.as_ref() {
                Some(s) => (s.buffer.clone(), s.shared.clone(), s.scans_per_read),
                None => return Err(StreamError::NotRunning { handle }),
            }
        };
        {
            let state = *entry.state.lock();
            if state != SessionState::Running && state != SessionState::Stopping {
                return Err(StreamError::NotRunning { handle });
            }
        }

        let _guard = ReaderGuard::acquire(handle, &shared)?;
        match buffer.dequeue_batch(scans_per_read) {
            Ok((data, host_backlog)) => Ok(ScanBatch {
                data,
                device_backlog: shared.device_backlog.load(Ordering::Acquire),
                host_backlog,
            }),
            Err(CloseReason::Stopped) => Err(StreamError::SessionStopped { handle }),
            Err(CloseReason::LinkLost) => {
                let reason = shared
                    .fault_reason
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "link lost during streaming".to_string());
                Err(StreamError::DeviceCommunication { handle, reason })
            }
        }
    }

    /// Arm (`Some`) or disarm (`None`) the per-batch callback.
    ///
    /// Exactly one handler is active at a time; arming replaces a previous
    /// handler after its in-flight invocation completes. Disarming
    /// guarantees no further invocation once this call returns.
    ///
    /// The handler runs on a dedicated dispatcher thread and is expected to
    /// call [`read_stream`](Self::read_stream). It must not call
    /// [`stop_stream`](Self::stop_stream) or disarm itself: both join the
    /// dispatcher thread and would deadlock on the handler's own frame.
    pub fn set_stream_callback(
        &self,
        handle: DeviceHandle,
        callback: Option<StreamCallback>,
    ) -> StreamResult<()> {
        let entry = self.registry.get(handle)?;
        // The dispatcher being replaced is joined outside the session lock:
        // its handler may be blocked inside read_stream, which briefly
        // takes that lock on entry
        let replaced = match callback {
            Some(callback) => {
                let mut session = entry.session.lock();
                let s = session
                    .as_mut()
                    .ok_or(StreamError::NotRunning { handle })?;
                if *entry.state.lock() != SessionState::Running {
                    return Err(StreamError::NotRunning { handle });
                }

                let old = s.dispatcher.take();
                if old.is_some() {
                    *s.shared.notifier.lock() = None;
                }

                let dispatcher = CallbackDispatcher::spawn(handle, callback);
                // Baseline past batches so arming does not replay them
                let fed = s.shared.scans_fed.load(Ordering::Acquire);
                s.shared
                    .batches_notified
                    .store(fed / s.scans_per_read as u64, Ordering::Release);
                *s.shared.notifier.lock() = Some(dispatcher.notifier());
                s.dispatcher = Some(dispatcher);
                tracing::debug!(device = handle, "stream callback armed");
                old
            }
            None => {
                let mut session = entry.session.lock();
                let s = session
                    .as_mut()
                    .ok_or(StreamError::NotRunning { handle })?;
                *s.shared.notifier.lock() = None;
                tracing::debug!(device = handle, "stream callback disarmed");
                s.dispatcher.take()
            }
        };

        if let Some(mut old) = replaced {
            old.shutdown();
        }
        Ok(())
    }

    /// Stop the session and release every blocked call on it.
    ///
    /// Idempotent: stopping an already-stopped session is an `Ok` no-op.
    /// When this returns, the worker and any callback dispatcher have been
    /// joined and the host buffer is gone.
    pub fn stop_stream(&self, handle: DeviceHandle) -> StreamResult<()> {
        let entry = self.registry.get(handle)?;
        let taken = entry.session.lock().take();
        let Some(mut session) = taken else {
            // Already stopped, or another caller owns the teardown
            return Ok(());
        };

        *entry.state.lock() = SessionState::Stopping;
        session.shared.stop_requested.store(true, Ordering::Release);
        session.buffer.close(CloseReason::Stopped);

        *session.shared.notifier.lock() = None;
        if let Some(mut dispatcher) = session.dispatcher.take() {
            dispatcher.shutdown();
        }
        if let Some(worker) = session.worker.take() {
            let _ = worker.join();
        }

        if let Err(err) = entry.transport.lock().end_scanning() {
            tracing::warn!(device = handle, error = %err, "end_scanning failed during stop");
        }

        *entry.state.lock() = SessionState::Stopped;
        tracing::info!(device = handle, "stream stopped");
        Ok(())
    }

    /// Start, collect exactly `num_scans` scans, and stop.
    ///
    /// Returns the actual scan rate and the flat channel-interleaved data.
    pub fn stream_burst(
        &self,
        handle: DeviceHandle,
        channel_list: &[u32],
        scan_rate: f64,
        num_scans: usize,
    ) -> StreamResult<(f64, Vec<f64>)> {
        if num_scans == 0 {
            return Err(StreamError::InvalidConfiguration {
                reason: "burst of zero scans".to_string(),
            });
        }
        if num_scans > self.settings.max_burst_scans {
            return Err(StreamError::InvalidConfiguration {
                reason: format!(
                    "burst of {} scans exceeds limit {}",
                    num_scans, self.settings.max_burst_scans
                ),
            });
        }

        let actual_rate = self.start_stream(handle, channel_list, num_scans, scan_rate)?;
        let collected = self.read_stream(handle);
        let stopped = self.stop_stream(handle);
        let batch = collected?;
        stopped?;
        Ok((actual_rate, batch.data))
    }

    /// Initialize double-buffered waveform output on an output register.
    ///
    /// Must precede `start_stream` on the same device; the device consults
    /// the output buffer state the moment scanning begins.
    pub fn initialize_stream_out(
        &self,
        handle: DeviceHandle,
        config: StreamOutConfig,
        phase0: Vec<f64>,
        phase1: Vec<f64>,
    ) -> StreamResult<()> {
        let entry = self.registry.get(handle)?;
        if *entry.state.lock() != SessionState::Stopped {
            return Err(StreamError::AlreadyRunning { handle });
        }

        let target = config.target_register;
        let mut channel = StreamOutChannel::new(config, phase0, phase1)?;

        let mut stream_outs = entry.stream_outs.lock();
        if stream_outs.contains_key(&target) {
            return Err(StreamError::StreamOutExists { handle, target });
        }
        channel
            .initialize(&mut **entry.transport.lock())
            .map_err(|e| StreamError::from_transport(handle, e))?;
        stream_outs.insert(target, channel);
        tracing::debug!(device = handle, target, "stream-out initialized");
        Ok(())
    }

    /// Transfer the inactive phase to the device and rotate.
    ///
    /// Drive this on the same interval cadence as the read loop; a missed
    /// refill makes the device repeat the last armed phase.
    pub fn refill_stream_out(&self, handle: DeviceHandle, target: u32) -> StreamResult<()> {
        let entry = self.registry.get(handle)?;
        let mut stream_outs = entry.stream_outs.lock();
        let channel = stream_outs
            .get_mut(&target)
            .ok_or(StreamError::StreamOutUnknown { handle, target })?;
        let result = channel
            .refill(&mut **entry.transport.lock())
            .map_err(|e| StreamError::from_transport(handle, e));
        result
    }

    /// Replace one waveform phase of a stream-out channel
    pub fn set_stream_out_phase(
        &self,
        handle: DeviceHandle,
        target: u32,
        phase_index: usize,
        samples: Vec<f64>,
    ) -> StreamResult<()> {
        let entry = self.registry.get(handle)?;
        let mut stream_outs = entry.stream_outs.lock();
        let channel = stream_outs
            .get_mut(&target)
            .ok_or(StreamError::StreamOutUnknown { handle, target })?;
        channel.set_phase(phase_index, samples)
    }

    /// Snapshot session state and backlog counters
    pub fn session_info(&self, handle: DeviceHandle) -> StreamResult<SessionInfo> {
        let entry = self.registry.get(handle)?;
        let state = *entry.state.lock();
        let session = entry.session.lock();
        match session.as_ref() {
            Some(s) => Ok(SessionInfo {
                state,
                channel_list: s.channel_list.clone(),
                scans_per_read: s.scans_per_read,
                requested_scan_rate: s.requested_scan_rate,
                actual_scan_rate: s.actual_scan_rate,
                host_backlog: s.buffer.host_backlog(),
                device_backlog: s.shared.device_backlog.load(Ordering::Acquire),
                scans_lost: s.buffer.total_lost(),
            }),
            None => Ok(SessionInfo {
                state,
                channel_list: Vec::new(),
                scans_per_read: 0,
                requested_scan_rate: 0.0,
                actual_scan_rate: 0.0,
                host_backlog: 0,
                device_backlog: 0,
                scans_lost: 0,
            }),
        }
    }

    /// Backlog-aware sleep suggestion before the next `read_stream` poll
    pub fn suggested_poll_delay(&self, handle: DeviceHandle) -> StreamResult<Duration> {
        let entry = self.registry.get(handle)?;
        let session = entry.session.lock();
        let s = session
            .as_ref()
            .ok_or(StreamError::NotRunning { handle })?;
        Ok(next_poll_delay(
            s.scans_per_read,
            s.actual_scan_rate,
            s.buffer.host_backlog(),
        ))
    }

    fn start_stream_inner(
        &self,
        entry: &Arc<DeviceEntry>,
        channel_list: &[u32],
        scans_per_read: usize,
        scan_rate: f64,
    ) -> StreamResult<f64> {
        let handle = entry.handle;
        if scans_per_read == 0 {
            return Err(StreamError::InvalidConfiguration {
                reason: "scans_per_read must be positive".to_string(),
            });
        }
        if channel_list.is_empty() {
            return Err(StreamError::InvalidConfiguration {
                reason: "channel list must not be empty".to_string(),
            });
        }
        if channel_list.len() > stream_consts::MAX_CHANNELS {
            return Err(StreamError::InvalidConfiguration {
                reason: format!(
                    "{} channels exceeds limit {}",
                    channel_list.len(),
                    stream_consts::MAX_CHANNELS
                ),
            });
        }
        if !scan_rate.is_finite() || scan_rate <= 0.0 {
            return Err(StreamError::InvalidConfiguration {
                reason: format!("scan rate {} is not positive", scan_rate),
            });
        }

        let actual_rate = entry
            .transport
            .lock()
            .begin_scanning(channel_list, scan_rate)
            .map_err(|e| StreamError::from_transport(handle, e))?;

        let capacity_scans = (scans_per_read * self.settings.buffer_batches)
            .max(stream_consts::MIN_BUFFER_SCANS)
            .max(scans_per_read);
        let buffer = Arc::new(ScanBuffer::new(channel_list.len(), capacity_scans));
        let shared = Arc::new(SessionShared::new());

        let poll_micros = worker_poll_micros(
            scans_per_read,
            actual_rate,
            self.settings.worker_poll_divisor,
        );
        let worker = {
            let entry = entry.clone();
            let buffer = buffer.clone();
            let shared = shared.clone();
            let clock = self.clock.clone();
            std::thread::Builder::new()
                .name(format!("daq-stream-{}", handle))
                .spawn(move || {
                    run_transport_worker(entry, buffer, shared, clock, scans_per_read, poll_micros)
                })
                .expect("spawn transport worker thread")
        };

        *entry.session.lock() = Some(ActiveSession {
            channel_list: channel_list.to_vec(),
            scans_per_read,
            requested_scan_rate: scan_rate,
            actual_scan_rate: actual_rate,
            buffer,
            shared,
            worker: Some(worker),
            dispatcher: None,
        });
        Ok(actual_rate)
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        // Workers hold the device entries alive; stop them all so no
        // transport thread outlives the controller
        for handle in self.registry.handles() {
            let _ = self.stop_stream(handle);
        }
    }
}

/// Sleep between transport polls: a fraction of one batch period, clamped
fn worker_poll_micros(scans_per_read: usize, scan_rate: f64, divisor: u32) -> u64 {
    let batch_micros =
        scans_per_read as f64 / scan_rate * timing_consts::MICROS_PER_SECOND as f64;
    let poll = (batch_micros / divisor.max(1) as f64) as u64;
    poll.clamp(
        timing_consts::MIN_WORKER_POLL_MICROS,
        timing_consts::MAX_WORKER_POLL_MICROS,
    )
}

fn run_transport_worker(
    entry: Arc<DeviceEntry>,
    buffer: Arc<ScanBuffer>,
    shared: Arc<SessionShared>,
    clock: Arc<dyn ClockSource>,
    scans_per_read: usize,
    poll_micros: u64,
) {
    let handle = entry.handle;
    let channels = buffer.channels();
    tracing::debug!(device = handle, poll_micros, "transport worker started");

    loop {
        if shared.stop_requested.load(Ordering::Acquire) {
            break;
        }

        let fetched = entry.transport.lock().fetch_available_scans();
        match fetched {
            Ok(fetched) => {
                shared
                    .device_backlog
                    .store(fetched.device_backlog, Ordering::Release);

                let scans = (fetched.data.len() / channels) as u64;
                for scan in fetched.data.chunks_exact(channels) {
                    buffer.enqueue(scan);
                }
                if scans > 0 {
                    let fed = shared.scans_fed.fetch_add(scans, Ordering::AcqRel) + scans;
                    let ready = fed / scans_per_read as u64;
                    let notifier = shared.notifier.lock();
                    match notifier.as_ref() {
                        Some(sender) => {
                            let mut notified = shared.batches_notified.load(Ordering::Acquire);
                            while notified < ready {
                                if sender
                                    .send(crate::stream::callback::DispatchEvent::BatchReady)
                                    .is_err()
                                {
                                    break;
                                }
                                notified += 1;
                            }
                            shared.batches_notified.store(notified, Ordering::Release);
                        }
                        None => {
                            // Keep the baseline current so arming later does
                            // not replay already-consumed batches
                            shared.batches_notified.store(ready, Ordering::Release);
                        }
                    }
                }
            }
            Err(err) => {
                // Any mid-stream transport fault is terminal for the session
                tracing::error!(device = handle, error = %err, "transport fault, stopping session");
                *shared.fault_reason.lock() = Some(fault_reason(&err));
                {
                    let mut state = entry.state.lock();
                    if *state == SessionState::Running {
                        *state = SessionState::Stopping;
                    }
                }
                buffer.close(CloseReason::LinkLost);
                break;
            }
        }

        let deadline = clock.now_micros() + poll_micros;
        clock.sleep_until_micros(deadline);
    }

    tracing::debug!(device = handle, "transport worker exited");
}

fn fault_reason(err: &TransportError) -> String {
    match err {
        TransportError::Rejected { reason }
        | TransportError::LinkLost { reason }
        | TransportError::Protocol { reason } => reason.clone(),
    }
}

/// Enforces the single-reader contract; releases the slot on drop
struct ReaderGuard<'a> {
    shared: &'a SessionShared,
}

impl<'a> ReaderGuard<'a> {
    fn acquire(handle: DeviceHandle, shared: &'a SessionShared) -> StreamResult<Self> {
        if shared
            .reader_active
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(StreamError::ConcurrentAccess { handle });
        }
        Ok(Self { shared })
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.shared.reader_active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_poll_micros_clamping() {
        // 100 scans at 100 Hz is a 1 s batch; a quarter is 250 ms, clamped
        assert_eq!(
            worker_poll_micros(100, 100.0, 4),
            timing_consts::MAX_WORKER_POLL_MICROS
        );
        // 10 scans at 1 MHz is 10 us; a quarter clamps up to the floor
        assert_eq!(
            worker_poll_micros(10, 1_000_000.0, 4),
            timing_consts::MIN_WORKER_POLL_MICROS
        );
        // 100 scans at 1 kHz is 100 ms; a quarter is 25 ms
        assert_eq!(worker_poll_micros(100, 1_000.0, 4), 25_000);
    }

    #[test]
    fn test_reader_guard_exclusion() {
        let shared = SessionShared::new();
        let first = ReaderGuard::acquire(1, &shared).unwrap();
        assert_eq!(
            ReaderGuard::acquire(1, &shared).err(),
            Some(StreamError::ConcurrentAccess { handle: 1 })
        );
        drop(first);
        assert!(ReaderGuard::acquire(1, &shared).is_ok());
    }
}
