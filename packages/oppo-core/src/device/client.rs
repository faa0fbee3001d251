//! High-level player commands.
//!
//! [`OppoClient`] wraps a [`CommandTransport`] with typed sends, remote key
//! presses and the query commands the player understands.

use std::sync::Arc;
use std::time::Duration;

use super::command::Command;
use super::remote::RemoteKey;
use super::response::{parse_number, parse_ok, parse_typed_value, TypedValue};
use super::traits::{CommandTransport, PlayerHttpApi};
use crate::error::{OppoError, OppoResult};

const QUERY_VERBOSITY: &str = "QVM";
const SET_VERBOSITY: &str = "SVM";
const QUERY_DIRECTORY_SIZE: &str = "QDS";
const QUERY_DIRECTORY_ITEM: &str = "QDR";

/// Command surface of the player.
#[derive(Clone)]
pub struct OppoClient {
    transport: Arc<dyn CommandTransport>,
    http: Arc<dyn PlayerHttpApi>,
    timeout: Duration,
    inter_key_delay: Duration,
}

impl OppoClient {
    /// Creates a client.
    ///
    /// `timeout` applies to every command; `inter_key_delay` is the default
    /// pause between presses in [`Self::press_keys`].
    pub fn new(
        transport: Arc<dyn CommandTransport>,
        http: Arc<dyn PlayerHttpApi>,
        timeout: Duration,
        inter_key_delay: Duration,
    ) -> Self {
        Self {
            transport,
            http,
            timeout,
            inter_key_delay,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a command and returns the raw response line.
    pub async fn send_raw(&self, command: &Command) -> OppoResult<String> {
        self.transport.send(command, self.timeout).await
    }

    /// Sends a command that must be answered with exactly `OK`.
    pub async fn send_ok(&self, command: &Command) -> OppoResult<()> {
        let response = self.send_raw(command).await?;
        parse_ok(command.verb(), &response)
    }

    /// Sends a command answered with `OK <digits>`.
    pub async fn send_number(&self, command: &Command) -> OppoResult<u64> {
        let response = self.send_raw(command).await?;
        parse_number(command.verb(), &response)
    }

    /// Sends a command answered with `OK <type> <value>` or a bare `OK`.
    pub async fn send_typed(&self, command: &Command) -> OppoResult<Option<TypedValue>> {
        let response = self.send_raw(command).await?;
        parse_typed_value(command.verb(), &response)
    }

    /// Presses one remote key.
    pub async fn press_key(&self, key: RemoteKey) -> OppoResult<()> {
        log::debug!("[Remote] Pressing {} ({})", key, key.verb());
        self.send_ok(&key.command()).await
    }

    /// Presses keys in order with the configured delay after each press.
    ///
    /// Stops at the first failure.
    pub async fn press_keys(&self, keys: &[RemoteKey]) -> OppoResult<()> {
        self.press_keys_with_delay(keys, self.inter_key_delay).await
    }

    /// Presses keys in order with `delay` after each press.
    pub async fn press_keys_with_delay(
        &self,
        keys: &[RemoteKey],
        delay: Duration,
    ) -> OppoResult<()> {
        for (i, key) in keys.iter().enumerate() {
            if let Err(e) = self.press_key(*key).await {
                log::warn!(
                    "[Remote] Sequence aborted at key {} of {} ({}): {}",
                    i + 1,
                    keys.len(),
                    key,
                    e
                );
                return Err(e);
            }
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    /// Reads the status verbosity mode (`#QVM`).
    pub async fn query_verbosity_mode(&self) -> OppoResult<u64> {
        self.send_number(&Command::from_static(QUERY_VERBOSITY)).await
    }

    /// Sets the status verbosity mode (`#SVM n`) and returns the mode reported back.
    pub async fn set_verbosity_mode(&self, mode: u8) -> OppoResult<u64> {
        let command = Command::with_arg(SET_VERBOSITY, mode.to_string())?;
        self.send_number(&command).await
    }

    /// Number of entries in the current directory (`#QDS`).
    pub async fn query_directory_size(&self) -> OppoResult<u64> {
        self.send_number(&Command::from_static(QUERY_DIRECTORY_SIZE)).await
    }

    /// Entry `index` of the current directory (`#QDR index`).
    ///
    /// Returns `None` when the player has no such entry.
    pub async fn query_directory_item(&self, index: u64) -> OppoResult<Option<TypedValue>> {
        let command = Command::with_arg(QUERY_DIRECTORY_ITEM, index.to_string())?;
        self.send_typed(&command).await
    }

    /// Starts playback of a folder through the HTTP API.
    ///
    /// # Errors
    /// [`OppoError::NotConnected`] if no player has been found yet.
    pub async fn play_folder(&self, folder: &str) -> OppoResult<String> {
        let device = self.transport.device().ok_or(OppoError::NotConnected)?;
        self.http.play_folder(device.address, folder).await
    }
}
