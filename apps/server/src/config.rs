//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Control port used when `device_address` names only an IP.
const DEFAULT_CONTROL_PORT: u16 = 23;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Player to connect to directly, as `ip` or `ip:port`.
    /// Discovery is used when unset.
    /// Override: `OPPO_DEVICE_ADDRESS`
    pub device_address: Option<String>,

    /// Seconds to wait before reconnecting after a lost connection.
    /// Override: `OPPO_RECONNECT_DELAY_SECS`
    pub reconnect_delay_secs: u64,

    /// Exact status line to URL fetched when that line arrives.
    pub status_hooks: BTreeMap<String, String>,

    /// Protocol settings passed to oppo-core.
    /// `command_timeout_ms` can be overridden with `OPPO_COMMAND_TIMEOUT_MS`.
    #[serde(flatten)]
    pub core: oppo_core::Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device_address: None,
            reconnect_delay_secs: 2,
            status_hooks: BTreeMap::new(),
            core: oppo_core::Config::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("OPPO_DEVICE_ADDRESS") {
            self.device_address = Some(val);
        }

        if let Some(val) = var("OPPO_COMMAND_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.core.command_timeout_ms = ms;
            }
        }

        if let Some(val) = var("OPPO_RECONNECT_DELAY_SECS") {
            if let Ok(secs) = val.parse() {
                self.reconnect_delay_secs = secs;
            }
        }
    }

    /// Resolves `device_address` to a socket address.
    pub fn device_endpoint(&self) -> Result<Option<SocketAddr>> {
        self.device_address
            .as_deref()
            .map(parse_device_address)
            .transpose()
    }
}

/// Parses `ip` or `ip:port`, defaulting to the player's control port.
pub fn parse_device_address(value: &str) -> Result<SocketAddr> {
    let value = value.trim();
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = value
        .parse()
        .with_context(|| format!("Invalid device address: {}", value))?;
    Ok(SocketAddr::new(ip, DEFAULT_CONTROL_PORT))
}
