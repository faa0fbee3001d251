//! Centralized error types for the Oppo control core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Converts discovery errors into [`OppoError`]
//! - Exposes stable machine-readable codes through [`ErrorCode`]

use std::time::Duration;

use thiserror::Error;

use crate::context::NetworkError;
use crate::device::codec::CodecError;
use crate::device::discovery::DiscoveryError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for logs and reports.
    fn code(&self) -> &'static str;
}

impl ErrorCode for DiscoveryError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::Receive(_) => "discovery_receive_failed",
            Self::NotAnnouncement => "not_an_announcement",
            Self::Malformed(_) => "discovery_malformed",
        }
    }
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::Overflow { .. } => "frame_overflow",
            Self::Io(_) => "connection_lost",
        }
    }
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::Detection(_) => "ip_detection_failed",
            Self::Interface(_) => "network_interface_error",
        }
    }
}

/// Application-wide error type for the Oppo control core.
#[derive(Debug, Error)]
pub enum OppoError {
    /// A command was issued while the session is not connected.
    #[error("Not connected to a player")]
    NotConnected,

    /// No response line arrived within the caller's timeout.
    #[error("No response to {verb} within {timeout:?}")]
    Timeout {
        /// Verb of the command that went unanswered.
        verb: String,
        /// The timeout the caller asked for.
        timeout: Duration,
    },

    /// The response did not have the shape expected for the verb that was sent.
    #[error("Unexpected response to {verb}: expected {expected}, got {response:?}")]
    ProtocolMismatch {
        /// Verb of the command that was sent.
        verb: String,
        /// Human-readable description of the expected shape.
        expected: &'static str,
        /// The response text as received.
        response: String,
    },

    /// The TCP connection failed or was closed by the peer.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The player sent a line longer than the frame buffer.
    #[error("Line exceeds {limit} byte frame buffer")]
    FrameOverflow {
        /// The configured frame buffer limit.
        limit: usize,
    },

    /// Discovery socket failure.
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Opening the TCP session failed.
    #[error("Failed to connect to player: {0}")]
    Connect(#[source] std::io::Error),

    /// The command could not be framed for the wire.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// `connect()` was called while a session is already active or pending.
    #[error("Session is already connected or connecting")]
    AlreadyConnected,

    /// The core is shutting down.
    #[error("Shutting down")]
    ShuttingDown,

    /// HTTP control API request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ErrorCode for OppoError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Timeout { .. } => "timeout",
            Self::ProtocolMismatch { .. } => "protocol_mismatch",
            Self::ConnectionLost(_) => "connection_lost",
            Self::FrameOverflow { .. } => "frame_overflow",
            Self::Discovery(e) => e.code(),
            Self::Connect(_) => "connect_failed",
            Self::InvalidCommand(_) => "invalid_command",
            Self::AlreadyConnected => "already_connected",
            Self::ShuttingDown => "shutting_down",
            Self::Http(_) => "http_request_failed",
            Self::Configuration(_) => "configuration_error",
        }
    }
}

impl OppoError {
    /// Returns true if the session is still usable after this error.
    ///
    /// Timeouts and mismatches leave the connection intact; the caller may
    /// simply issue the next command.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::ProtocolMismatch { .. } | Self::InvalidCommand(_)
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::device::discovery::DiscoveryResult;

/// Convenient Result alias for application-wide operations.
pub type OppoResult<T> = Result<T, OppoError>;
