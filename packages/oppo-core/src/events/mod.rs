//! Event system for the session's subscriber.
//!
//! This module provides:
//! - [`EventEmitter`] trait the owner implements to receive events
//! - [`ChannelEventBridge`] for consuming events from an async task
//! - Event types for connection lifecycle and status lines
//!
//! Events are produced by the session and delivered one at a time, in the
//! order they occurred, by [`crate::services::StatusDispatcher`].

mod bridge;
mod emitter;

pub use bridge::ChannelEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter};

use serde::Serialize;

use crate::device::DeviceAnnouncement;
use crate::protocol_constants::{STATUS_PREFIX, VERB_LENGTH};
use crate::utils::now_millis;

/// Events delivered to the subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// Session connected or disconnected.
    Connection(ConnectionEvent),

    /// Unsolicited status line from the player.
    Status(StatusEvent),
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum DisconnectReason {
    /// The player closed the connection.
    PeerClosed,
    /// Reading from the socket failed.
    ReadFailed(String),
    /// Writing a command failed.
    WriteFailed(String),
    /// The player sent a line longer than the frame buffer.
    FrameOverflow { limit: usize },
    /// The idle `#NOP` probe went unanswered.
    ProbeUnanswered,
    /// A response arrived with no pending command and policy says to drop.
    UnmatchedResponse,
    /// The owner asked the session to close.
    Closed,
    /// The core is shutting down.
    Shutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::ReadFailed(e) => write!(f, "read failed: {}", e),
            Self::WriteFailed(e) => write!(f, "write failed: {}", e),
            Self::FrameOverflow { limit } => write!(f, "line exceeded {} byte buffer", limit),
            Self::ProbeUnanswered => f.write_str("idle probe unanswered"),
            Self::UnmatchedResponse => f.write_str("unmatched response"),
            Self::Closed => f.write_str("closed by owner"),
            Self::Shutdown => f.write_str("shutting down"),
        }
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionEvent {
    /// The TCP session to the player is open.
    Connected {
        /// The player the session is connected to.
        device: DeviceAnnouncement,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The TCP session ended. Emitted exactly once per `Connected`.
    Disconnected {
        reason: DisconnectReason,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
}

impl ConnectionEvent {
    pub fn connected(device: DeviceAnnouncement) -> Self {
        Self::Connected {
            device,
            timestamp: now_millis(),
        }
    }

    pub fn disconnected(reason: DisconnectReason) -> Self {
        Self::Disconnected {
            reason,
            timestamp: now_millis(),
        }
    }
}

/// An unsolicited status line such as `@@UPL PLAY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// The line as received, without its terminator.
    pub line: String,
    /// Three-character status code (`UPL`), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    /// Everything after the code (`PLAY`), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl StatusEvent {
    /// Splits a status line into its code and payload.
    pub fn from_line(line: impl Into<String>) -> Self {
        let line = line.into();
        let body = line.strip_prefix(STATUS_PREFIX).unwrap_or(&line);
        let (verb, payload) = match body.split_once(' ') {
            Some((verb, payload)) => (verb, Some(payload.trim())),
            None => (body, None),
        };
        let verb = (verb.len() == VERB_LENGTH).then(|| verb.to_string());
        let payload = payload.filter(|p| !p.is_empty()).map(str::to_string);
        Self {
            verb,
            payload,
            line,
            timestamp: now_millis(),
        }
    }

    /// True if this is the given status code.
    pub fn is(&self, verb: &str) -> bool {
        self.verb
            .as_deref()
            .is_some_and(|v| v.eq_ignore_ascii_case(verb))
    }
}

impl From<ConnectionEvent> for DeviceEvent {
    fn from(event: ConnectionEvent) -> Self {
        DeviceEvent::Connection(event)
    }
}

impl From<StatusEvent> for DeviceEvent {
    fn from(event: StatusEvent) -> Self {
        DeviceEvent::Status(event)
    }
}
