//! Core configuration.
//!
//! Durations are stored as plain integers (seconds or milliseconds, per the
//! field suffix) so they read naturally in YAML; use the accessor methods to
//! get [`Duration`] values.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OppoError, OppoResult};
use crate::protocol_constants::{
    DEFAULT_MAX_LINE_LENGTH, DISCOVERY_PORT, HTTP_API_PORT, IDLE_PROBE_SECS,
    KEEPALIVE_BROADCAST_ADDR, KEEPALIVE_ESTABLISHED_INTERVAL, KEEPALIVE_INITIAL_INTERVAL,
    KEEPALIVE_PORT, PLAYER_START_MESSAGE,
};

/// What to do with a response line that arrives while no command is pending.
///
/// The protocol carries no transaction IDs, so such a line is usually the late
/// answer to a command whose caller already timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedResponsePolicy {
    /// Count it and log a warning.
    #[default]
    Log,
    /// Count it silently.
    Ignore,
    /// Treat it as a protocol failure and drop the connection.
    Disconnect,
}

/// Configuration for the Oppo control core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    // Discovery
    /// UDP port to listen on for player announcements.
    pub discovery_port: u16,

    /// Announcement message names that never complete discovery.
    pub ignored_announcements: Vec<String>,

    // Keepalive
    /// Local UDP port the registration broadcaster binds to.
    pub keepalive_port: u16,

    /// Destination of the registration datagram.
    pub keepalive_target: SocketAddr,

    /// Registration cadence until a reply is seen (milliseconds).
    pub keepalive_initial_interval_ms: u64,

    /// Registration cadence after a reply is seen (seconds).
    pub keepalive_established_interval_secs: u64,

    // Session
    /// Timeout for opening the TCP session (seconds).
    pub connect_timeout_secs: u64,

    /// Default timeout for a command response (milliseconds).
    pub command_timeout_ms: u64,

    /// Seconds without a received line before a `#NOP` probe is sent.
    pub idle_probe_secs: u64,

    /// Frame buffer limit for a single received line (bytes).
    pub max_line_length: usize,

    /// Handling of response lines with no pending command.
    pub unmatched_response: UnmatchedResponsePolicy,

    // Remote
    /// Delay between presses in a key sequence (milliseconds).
    pub inter_key_delay_ms: u64,

    // HTTP API
    /// Port of the player's HTTP control API.
    pub http_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: DISCOVERY_PORT,
            ignored_announcements: vec![PLAYER_START_MESSAGE.to_string()],
            keepalive_port: KEEPALIVE_PORT,
            keepalive_target: KEEPALIVE_BROADCAST_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([255, 255, 255, 255], KEEPALIVE_PORT))),
            keepalive_initial_interval_ms: KEEPALIVE_INITIAL_INTERVAL.as_millis() as u64,
            keepalive_established_interval_secs: KEEPALIVE_ESTABLISHED_INTERVAL.as_secs(),
            connect_timeout_secs: 5,
            command_timeout_ms: 5000,
            idle_probe_secs: IDLE_PROBE_SECS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            unmatched_response: UnmatchedResponsePolicy::default(),
            inter_key_delay_ms: 200,
            http_port: HTTP_API_PORT,
        }
    }
}

impl Config {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`OppoError::Configuration`] if any value would stall or spin a loop.
    pub fn validate(&self) -> OppoResult<()> {
        let checks: [(&str, u64); 5] = [
            ("keepalive_initial_interval_ms", self.keepalive_initial_interval_ms),
            (
                "keepalive_established_interval_secs",
                self.keepalive_established_interval_secs,
            ),
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("command_timeout_ms", self.command_timeout_ms),
            ("idle_probe_secs", self.idle_probe_secs),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, v)| *v == 0) {
            return Err(OppoError::Configuration(format!("{} must be >= 1", name)));
        }
        if self.max_line_length == 0 {
            return Err(OppoError::Configuration(
                "max_line_length must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn keepalive_initial_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_initial_interval_ms)
    }

    pub fn keepalive_established_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_established_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn idle_probe_interval(&self) -> Duration {
        Duration::from_secs(self.idle_probe_secs)
    }

    pub fn inter_key_delay(&self) -> Duration {
        Duration::from_millis(self.inter_key_delay_ms)
    }
}
