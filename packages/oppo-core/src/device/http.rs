//! Client for the player's HTTP control API.
//!
//! Some operations are only reachable over HTTP on port 436. Requests are
//! plain GETs with a JSON document appended verbatim after `?`.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::traits::PlayerHttpApi;
use crate::context::DeviceUrlBuilder;
use crate::error::OppoResult;
use crate::protocol_constants::PLAY_FOLDER_COMMAND;

/// Timeout for a single HTTP request to the player.
const HTTP_TIMEOUT_SECS: u64 = 10;

/// Builds the JSON argument for `checkfolderhasbdmv`.
pub fn play_folder_argument(folder: &str) -> String {
    serde_json::json!({ "folderpath": folder }).to_string()
}

/// reqwest-backed [`PlayerHttpApi`].
#[derive(Clone)]
pub struct HttpPlayerApi {
    client: Client,
    port: u16,
}

impl HttpPlayerApi {
    pub fn new(client: Client, port: u16) -> Self {
        Self { client, port }
    }
}

#[async_trait]
impl PlayerHttpApi for HttpPlayerApi {
    async fn play_folder(&self, ip: IpAddr, folder: &str) -> OppoResult<String> {
        let url = DeviceUrlBuilder::with_port(ip, self.port)
            .command_url(PLAY_FOLDER_COMMAND, &play_folder_argument(folder));
        log::info!("[HTTP] {} -> {}", PLAY_FOLDER_COMMAND, url);

        let start = std::time::Instant::now();
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;

        log::debug!(
            "[HTTP] {} completed in {:?}: {}",
            PLAY_FOLDER_COMMAND,
            start.elapsed(),
            body
        );
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_argument_is_json() {
        assert_eq!(
            play_folder_argument("/mnt/sda1/Movies/Film (2019)"),
            r#"{"folderpath":"/mnt/sda1/Movies/Film (2019)"}"#
        );
    }

    #[test]
    fn folder_argument_escapes_quotes() {
        assert_eq!(
            play_folder_argument(r#"/mnt/a "b""#),
            r#"{"folderpath":"/mnt/a \"b\""}"#
        );
    }
}
