//! Event emitter abstraction for decoupling the session from its subscriber.
//!
//! The core depends on the [`EventEmitter`] trait rather than a concrete
//! channel or callback type, so owners can plug in whatever delivery they need.

use super::{ConnectionEvent, DeviceEvent, StatusEvent};

/// Trait for receiving session events.
///
/// Calls are made from a single dispatcher task, one at a time and in the
/// order the events occurred. A slow implementation delays later events but
/// never the socket reader.
///
/// # Example
///
/// ```ignore
/// struct Subscriber;
///
/// impl EventEmitter for Subscriber {
///     fn emit_connection(&self, event: ConnectionEvent) { /* ... */ }
///     fn emit_status(&self, event: StatusEvent) {
///         if event.is("UPL") { /* ... */ }
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a Connected or Disconnected event.
    fn emit_connection(&self, event: ConnectionEvent);

    /// Emits an unsolicited status line.
    fn emit_status(&self, event: StatusEvent);

    /// Routes a [`DeviceEvent`] to the matching method.
    fn emit(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::Connection(e) => self.emit_connection(e),
            DeviceEvent::Status(e) => self.emit_status(e),
        }
    }
}

/// Logging emitter for debugging and development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_connection(&self, event: ConnectionEvent) {
        tracing::info!(?event, "connection_event");
    }

    fn emit_status(&self, event: StatusEvent) {
        tracing::debug!(
            line = %event.line,
            verb = ?event.verb,
            payload = ?event.payload,
            "status_event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DisconnectReason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        connection_count: AtomicUsize,
        status_count: AtomicUsize,
    }

    impl CountingEventEmitter {
        fn new() -> Self {
            Self {
                connection_count: AtomicUsize::new(0),
                status_count: AtomicUsize::new(0),
            }
        }
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_connection(&self, _event: ConnectionEvent) {
            self.connection_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_status(&self, _event: StatusEvent) {
            self.status_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn emit_routes_by_category() {
        let emitter = Arc::new(CountingEventEmitter::new());

        emitter.emit(StatusEvent::from_line("@@UPL PLAY").into());
        emitter.emit(StatusEvent::from_line("@@UPL STOP").into());
        emitter.emit(ConnectionEvent::disconnected(DisconnectReason::PeerClosed).into());

        assert_eq!(emitter.status_count.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.connection_count.load(Ordering::SeqCst), 1);
    }
}
