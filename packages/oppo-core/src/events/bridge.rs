//! Bridge implementation that maps emitter calls onto an async channel.
//!
//! The [`ChannelEventBridge`] lets an owner consume session events from its
//! own task with `recv().await` instead of implementing a callback.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::emitter::EventEmitter;
use super::{ConnectionEvent, DeviceEvent, StatusEvent};

/// Bridges session events to an unbounded channel.
///
/// The channel is unbounded so that a slow consumer makes the queue grow
/// rather than dropping status lines.
///
/// The bridge also forwards to an optional external emitter that can be set
/// after construction.
#[derive(Clone)]
pub struct ChannelEventBridge {
    tx: mpsc::UnboundedSender<DeviceEvent>,
    /// Optional external emitter that sees every event before the channel does
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl ChannelEventBridge {
    /// Creates a new bridge and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::with_sender(tx), rx)
    }

    /// Creates a new bridge wrapping an existing sender.
    pub fn with_sender(tx: mpsc::UnboundedSender<DeviceEvent>) -> Self {
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter, e.g. a [`super::LoggingEventEmitter`].
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if self.tx.send(DeviceEvent::$variant(event)).is_err() {
                log::trace!("[EventBridge] Receiver dropped, event discarded");
            }
        }
    };
}

impl EventEmitter for ChannelEventBridge {
    impl_emit!(emit_connection, ConnectionEvent, Connection);
    impl_emit!(emit_status, StatusEvent, Status);
}
