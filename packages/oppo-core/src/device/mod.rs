//! Player discovery, control session and command surface.
//!
//! Leaves first:
//! - [`codec`]: CR-terminated line framing and status/response classification
//! - [`discovery`]: UDP announcement listener
//! - [`keepalive`]: registration broadcaster
//! - [`correlator`]: one-in-flight command/response pairing
//! - [`session`]: TCP connection lifecycle and receive loop
//! - [`client`]: typed commands and remote key presses

pub mod client;
pub mod codec;
pub mod command;
pub mod correlator;
pub mod discovery;
pub mod http;
pub mod keepalive;
pub mod remote;
pub mod response;
pub mod session;
pub mod traits;

pub use client::OppoClient;
pub use codec::{CodecError, Line, LineCodec, LineKind};
pub use command::Command;
pub use correlator::{Correlator, ResponseOutcome};
pub use discovery::{parse_announcement, DeviceAnnouncement, DiscoveryError, DiscoveryListener};
pub use http::HttpPlayerApi;
pub use keepalive::{KeepaliveBroadcaster, KeepaliveSchedule};
pub use remote::RemoteKey;
pub use response::TypedValue;
pub use session::{ConnectionState, Session};
pub use traits::{CommandTransport, PlayerHttpApi};
