//! Status dispatcher service.
//!
//! Responsibilities:
//! - Draining the session's event queue
//! - Calling the subscriber once per event, in arrival order
//!
//! The queue is unbounded: a slow subscriber makes it grow, the socket reader
//! is never held up and nothing is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{DeviceEvent, EventEmitter};
use crate::runtime::TokioSpawner;

/// Delivers session events to the subscriber.
pub struct StatusDispatcher {
    emitter: Arc<dyn EventEmitter>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>>,
    delivered: Arc<AtomicU64>,
    spawner: TokioSpawner,
}

impl StatusDispatcher {
    /// Creates a new StatusDispatcher.
    pub fn new(
        emitter: Arc<dyn EventEmitter>,
        event_rx: mpsc::UnboundedReceiver<DeviceEvent>,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            emitter,
            event_rx: Arc::new(Mutex::new(Some(event_rx))),
            delivered: Arc::new(AtomicU64::new(0)),
            spawner,
        }
    }

    /// Number of events handed to the subscriber so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Spawns the dispatch loop.
    ///
    /// On cancellation, events already queued are still delivered before the
    /// loop exits. Returns `None` if the loop was already started.
    pub fn start(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut rx = self.event_rx.lock().take()?;
        let emitter = Arc::clone(&self.emitter);
        let delivered = Arc::clone(&self.delivered);

        Some(self.spawner.spawn_tracked(async move {
            log::debug!("[Dispatcher] Started");
            loop {
                tokio::select! {
                    // Deliver everything queued before honouring cancellation.
                    biased;
                    event = rx.recv() => match event {
                        Some(event) => {
                            emitter.emit(event);
                            delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        None => break,
                    },
                    _ = cancel.cancelled() => {
                        while let Ok(event) = rx.try_recv() {
                            emitter.emit(event);
                            delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        break;
                    }
                }
            }
            log::debug!(
                "[Dispatcher] Stopped after {} events",
                delivered.load(Ordering::Relaxed)
            );
        }))
    }
}
