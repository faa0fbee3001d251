//! Oppo Core - control-protocol client for Oppo network disc players.
//!
//! This crate finds a player on the local network, keeps it registered for
//! remote control, and drives it over its line-oriented TCP protocol. It is
//! used by the headless bridge server and can be embedded elsewhere.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`events`]: Connection and status events for subscribers
//! - [`context`]: Local address detection and player URL building
//! - [`config`]: Tunable timings and ports
//! - [`device`]: Discovery, keepalive, control session and command surface
//! - [`services`]: Event dispatch
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from concrete
//! implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`EventEmitter`](events::EventEmitter): Receiving session events
//! - [`IpDetector`](context::IpDetector): Local IP detection
//! - [`CommandTransport`](device::CommandTransport): Sending commands
//! - [`PlayerHttpApi`](device::PlayerHttpApi): The player's HTTP endpoint
//!
//! Each trait has a default implementation used by [`bootstrap_services`].

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod utils;

// Re-export commonly used types at the crate root
pub use config::{Config, UnmatchedResponsePolicy};
pub use context::{DeviceUrlBuilder, IpDetector, LocalIpDetector, NetworkError};
pub use error::{DiscoveryResult, ErrorCode, OppoError, OppoResult};
pub use events::{
    ChannelEventBridge, ConnectionEvent, DeviceEvent, DisconnectReason, EventEmitter,
    LoggingEventEmitter, StatusEvent,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use utils::now_millis;

// Re-export device types
pub use device::{
    Command, CommandTransport, ConnectionState, DeviceAnnouncement, DiscoveryError,
    DiscoveryListener, HttpPlayerApi, KeepaliveBroadcaster, OppoClient, PlayerHttpApi, RemoteKey,
    Session, TypedValue,
};

// Re-export service types
pub use services::StatusDispatcher;

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_services_with_detector, BootstrappedServices};
