// src/stream/callback.rs
//! Callback delivery for streaming sessions
//!
//! Batch-ready notifications are handed from the transport worker to a
//! dedicated dispatcher thread over a channel; the handler never runs on the
//! worker and receives only the device handle. Retrieving the data is the
//! handler's job (it calls back into `read_stream`), which keeps exactly one
//! buffering layer between device and consumer.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

/// Handler invoked once per completed read batch.
///
/// Runs on the session's dispatcher thread. The handler is expected to call
/// `read_stream` on the same device handle to retrieve the batch.
pub type StreamCallback = Box<dyn FnMut(i32) + Send + 'static>;

pub(crate) enum DispatchEvent {
    BatchReady,
    Shutdown,
}

/// Owns the dispatcher thread of one armed callback
pub(crate) struct CallbackDispatcher {
    sender: Sender<DispatchEvent>,
    thread: Option<JoinHandle<()>>,
}

impl CallbackDispatcher {
    pub(crate) fn spawn(handle: i32, callback: StreamCallback) -> Self {
        let (sender, receiver) = unbounded();
        let thread = std::thread::Builder::new()
            .name(format!("daq-callback-{}", handle))
            .spawn(move || dispatch_loop(handle, callback, receiver))
            .expect("spawn callback dispatcher thread");
        Self {
            sender,
            thread: Some(thread),
        }
    }

    /// Sender the transport worker posts batch-ready events on
    pub(crate) fn notifier(&self) -> Sender<DispatchEvent> {
        self.sender.clone()
    }

    /// Stop the dispatcher and wait for the in-flight invocation to finish.
    ///
    /// After this returns, the handler is guaranteed not to run again.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.sender.send(DispatchEvent::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(handle: i32, mut callback: StreamCallback, receiver: Receiver<DispatchEvent>) {
    while let Ok(event) = receiver.recv() {
        match event {
            DispatchEvent::Shutdown => break,
            DispatchEvent::BatchReady => {
                let outcome = catch_unwind(AssertUnwindSafe(|| callback(handle)));
                if outcome.is_err() {
                    tracing::error!(device = handle, "stream callback panicked, dispatcher continues");
                }
            }
        }
    }
    tracing::debug!(device = handle, "callback dispatcher exited");
}
