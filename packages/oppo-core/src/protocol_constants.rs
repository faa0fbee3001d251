//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the player's network control protocol and
//! changing them would break interoperability with the device.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// UDP Discovery / Registration
// ─────────────────────────────────────────────────────────────────────────────

/// UDP port the player broadcasts its announcements on.
pub const DISCOVERY_PORT: u16 = 7624;

/// UDP port the registration broadcast is sent to (and bound from).
pub const KEEPALIVE_PORT: u16 = 7624;

/// Registration datagram that keeps the player sending notifications to us.
pub const KEEPALIVE_MESSAGE: &str = "NOTIFY OREMOTE LOGIN";

/// Limited broadcast destination for the registration datagram.
pub const KEEPALIVE_BROADCAST_ADDR: &str = "255.255.255.255:7624";

/// Announcement the player emits when it boots.
///
/// It is not a reply to our registration, so both the listener and the
/// keepalive reply filter skip it by default.
pub const PLAYER_START_MESSAGE: &str = "OPPO Player Start";

/// Prefix of every announcement datagram.
pub const ANNOUNCEMENT_PREFIX: &str = "Notify:";

/// Registration cadence before any reply has been observed.
pub const KEEPALIVE_INITIAL_INTERVAL: Duration = Duration::from_secs(1);

/// Registration cadence once a reply has been observed.
pub const KEEPALIVE_ESTABLISHED_INTERVAL: Duration = Duration::from_secs(600);

// ─────────────────────────────────────────────────────────────────────────────
// TCP Command Session
// ─────────────────────────────────────────────────────────────────────────────

/// Leading byte of every command sent to the player.
pub const COMMAND_PREFIX: u8 = b'#';

/// Terminator appended to outgoing commands.
pub const COMMAND_TERMINATOR: &[u8] = b"\r\n";

/// Terminator of every line the player sends.
pub const LINE_TERMINATOR: u8 = b'\r';

/// Prefix marking an unsolicited status line.
pub const STATUS_PREFIX: &str = "@@";

/// Prefix of an echoed acknowledgement (`@SVM OK 2`).
pub const ECHO_PREFIX: char = '@';

/// Length of every protocol verb.
pub const VERB_LENGTH: usize = 3;

/// No-op verb used to probe a silent connection.
pub const NOP_VERB: &str = "NOP";

/// Seconds without a received line before the session probes the player.
pub const IDLE_PROBE_SECS: u64 = 30;

/// Default frame buffer limit (bytes).
///
/// A line longer than this is a fatal framing error for the session.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Control API
// ─────────────────────────────────────────────────────────────────────────────

/// Port of the player's HTTP control API.
pub const HTTP_API_PORT: u16 = 436;

/// HTTP command that starts playback of a folder containing a BDMV structure.
pub const PLAY_FOLDER_COMMAND: &str = "checkfolderhasbdmv";
