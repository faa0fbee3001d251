//! Status hooks.
//!
//! Fetches a configured URL whenever a matching status line arrives, e.g. to
//! switch an amplifier input when playback starts.

use std::collections::BTreeMap;

use oppo_core::StatusEvent;
use reqwest::Client;
use tokio::task::JoinHandle;

/// Maps exact status lines to URLs.
pub struct StatusHooks {
    client: Client,
    hooks: BTreeMap<String, String>,
}

impl StatusHooks {
    pub fn new(client: Client, hooks: BTreeMap<String, String>) -> Self {
        for (line, url) in &hooks {
            log::info!("[Hooks] {} -> {}", line, url);
        }
        Self { client, hooks }
    }

    pub fn url_for(&self, line: &str) -> Option<&str> {
        self.hooks.get(line.trim()).map(String::as_str)
    }

    /// Fires the hook for `event`, if any.
    ///
    /// The request runs in the background; failures are logged only.
    pub fn fire(&self, event: &StatusEvent) -> Option<JoinHandle<()>> {
        let url = self.url_for(&event.line)?.to_string();
        let client = self.client.clone();
        let line = event.line.clone();

        Some(tokio::spawn(async move {
            match client
                .get(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(response) => {
                    log::info!("[Hooks] {} -> {} ({})", line, url, response.status());
                }
                Err(e) => log::warn!("[Hooks] {} -> {} failed: {}", line, url, e),
            }
        }))
    }
}
