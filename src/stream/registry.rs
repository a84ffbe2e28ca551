// src/stream/registry.rs
//! Device-handle-keyed session registry
//!
//! Process-wide shared state is kept behind an explicit registry object
//! rather than module globals, so independent controllers (and their mock
//! transports) never interfere. Map mutation is atomic across handles;
//! start/stop on one handle serialize through the entry's state lock.

use crate::error::{StreamError, StreamResult};
use crate::stream::callback::{CallbackDispatcher, DispatchEvent};
use crate::stream::scan_buffer::ScanBuffer;
use crate::stream::stream_out::StreamOutChannel;
use crate::transport::StreamTransport;
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Opaque device-connection handle, supplied by the caller at attach time
pub type DeviceHandle = i32;

/// Stream session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session active
    Stopped,
    /// `start_stream` is configuring the device
    Starting,
    /// Scans are flowing
    Running,
    /// Teardown in progress (deliberate stop or link loss)
    Stopping,
}

/// State shared between facade callers, the transport worker, and the
/// callback dispatcher of one session
pub(crate) struct SessionShared {
    /// Device-side backlog reported by the last fetch
    pub(crate) device_backlog: AtomicU64,
    /// Guards the single-reader contract of `read_stream`
    pub(crate) reader_active: AtomicBool,
    /// Tells the transport worker to exit
    pub(crate) stop_requested: AtomicBool,
    /// Scans fed into the host buffer since start (losses included)
    pub(crate) scans_fed: AtomicU64,
    /// Completed batches already posted to the dispatcher
    pub(crate) batches_notified: AtomicU64,
    /// Armed batch-ready channel, if a callback is set
    pub(crate) notifier: Mutex<Option<Sender<DispatchEvent>>>,
    /// Cause recorded by the worker when the link fails
    pub(crate) fault_reason: Mutex<Option<String>>,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        Self {
            device_backlog: AtomicU64::new(0),
            reader_active: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            scans_fed: AtomicU64::new(0),
            batches_notified: AtomicU64::new(0),
            notifier: Mutex::new(None),
            fault_reason: Mutex::new(None),
        }
    }
}

/// One running stream session
pub(crate) struct ActiveSession {
    pub(crate) channel_list: Vec<u32>,
    pub(crate) scans_per_read: usize,
    pub(crate) requested_scan_rate: f64,
    pub(crate) actual_scan_rate: f64,
    pub(crate) buffer: Arc<ScanBuffer>,
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) worker: Option<JoinHandle<()>>,
    pub(crate) dispatcher: Option<CallbackDispatcher>,
}

/// Everything the registry tracks for one attached device
pub(crate) struct DeviceEntry {
    pub(crate) handle: DeviceHandle,
    pub(crate) transport: Mutex<Box<dyn StreamTransport>>,
    pub(crate) state: Mutex<SessionState>,
    pub(crate) session: Mutex<Option<ActiveSession>>,
    pub(crate) stream_outs: Mutex<HashMap<u32, StreamOutChannel>>,
}

/// Handle-keyed table of attached devices
pub(crate) struct StreamRegistry {
    devices: Mutex<HashMap<DeviceHandle, Arc<DeviceEntry>>>,
}

impl StreamRegistry {
    pub(crate) fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn attach(
        &self,
        handle: DeviceHandle,
        transport: Box<dyn StreamTransport>,
    ) -> StreamResult<()> {
        let mut devices = self.devices.lock();
        if devices.contains_key(&handle) {
            return Err(StreamError::DuplicateDevice { handle });
        }
        devices.insert(
            handle,
            Arc::new(DeviceEntry {
                handle,
                transport: Mutex::new(transport),
                state: Mutex::new(SessionState::Stopped),
                session: Mutex::new(None),
                stream_outs: Mutex::new(HashMap::new()),
            }),
        );
        Ok(())
    }

    pub(crate) fn detach(&self, handle: DeviceHandle) -> StreamResult<Arc<DeviceEntry>> {
        self.devices
            .lock()
            .remove(&handle)
            .ok_or(StreamError::UnknownDevice { handle })
    }

    pub(crate) fn get(&self, handle: DeviceHandle) -> StreamResult<Arc<DeviceEntry>> {
        self.devices
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(StreamError::UnknownDevice { handle })
    }

    pub(crate) fn attached_count(&self) -> usize {
        self.devices.lock().len()
    }

    pub(crate) fn handles(&self) -> Vec<DeviceHandle> {
        self.devices.lock().keys().copied().collect()
    }
}
