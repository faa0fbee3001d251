//! Trait abstractions for talking to the player.
//!
//! These traits enable dependency injection for testability. The client
//! facade depends on them rather than on a live socket or HTTP client.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use super::command::Command;
use super::discovery::DeviceAnnouncement;
use crate::error::OppoResult;

/// Trait for sending commands over the control session.
///
/// Implemented by [`super::Session`].
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Sends a command and returns the raw response line.
    ///
    /// # Errors
    /// `NotConnected`, `Timeout` or `ConnectionLost`.
    async fn send(&self, command: &Command, timeout: Duration) -> OppoResult<String>;

    /// The player the transport last connected to.
    fn device(&self) -> Option<DeviceAnnouncement>;
}

/// Trait for the player's HTTP control API.
#[async_trait]
pub trait PlayerHttpApi: Send + Sync {
    /// Starts playback of a folder on the player's storage.
    ///
    /// # Arguments
    /// * `ip` - Address of the player
    /// * `folder` - Path as the player sees it (e.g. `/mnt/sda1/Movies/Film`)
    async fn play_folder(&self, ip: IpAddr, folder: &str) -> OppoResult<String>;
}
