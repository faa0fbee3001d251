//! Local network context.
//!
//! This module provides:
//! - [`IpDetector`] for finding this host's addresses, used by the keepalive
//!   broadcaster to drop its own datagrams
//! - [`DeviceUrlBuilder`] for the player's HTTP control API

use std::net::IpAddr;
use std::sync::Arc;

use crate::protocol_constants::HTTP_API_PORT;

/// Trait for detecting the local host's IP addresses.
///
/// Different environments may need different detection strategies.
/// This trait allows injecting the appropriate detector.
pub trait IpDetector: Send + Sync {
    /// Returns every address assigned to this host.
    fn local_addresses(&self) -> Result<Vec<IpAddr>, NetworkError>;
}

/// Default IP detector using the system's network interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalIpDetector;

impl LocalIpDetector {
    /// Creates a new `LocalIpDetector`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Creates a new `LocalIpDetector` wrapped in an Arc.
    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self::new())
    }
}

impl IpDetector for LocalIpDetector {
    fn local_addresses(&self) -> Result<Vec<IpAddr>, NetworkError> {
        let interfaces = local_ip_address::list_afinet_netifas()
            .map_err(|e| NetworkError::Interface(e.to_string()))?;
        let mut addrs: Vec<IpAddr> = interfaces.into_iter().map(|(_, ip)| ip).collect();
        if addrs.is_empty() {
            // Some platforms only answer the single-address query.
            let ip = local_ip_address::local_ip()
                .map_err(|e| NetworkError::Detection(e.to_string()))?;
            addrs.push(ip);
        }
        Ok(addrs)
    }
}

/// Errors that can occur during network inspection.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Could not detect local IP address.
    #[error("Failed to detect local IP: {0}")]
    Detection(String),

    /// Network interface error.
    #[error("Network interface error: {0}")]
    Interface(String),
}

/// Builder for URLs on the player's HTTP control API.
pub struct DeviceUrlBuilder {
    ip: IpAddr,
    port: u16,
}

impl DeviceUrlBuilder {
    /// Creates a builder for the player at `ip` on the standard API port.
    pub fn new(ip: IpAddr) -> Self {
        Self::with_port(ip, HTTP_API_PORT)
    }

    /// Creates a builder for a non-standard port.
    pub fn with_port(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Returns the base URL of the API (e.g., `http://192.168.1.50:436`).
    #[must_use]
    pub fn base_url(&self) -> String {
        match self.ip {
            IpAddr::V4(ip) => format!("http://{}:{}", ip, self.port),
            IpAddr::V6(ip) => format!("http://[{}]:{}", ip, self.port),
        }
    }

    /// Returns the URL for an API command with a JSON argument.
    ///
    /// The player expects the JSON verbatim after `?`, not as a form field.
    #[must_use]
    pub fn command_url(&self, command: &str, json_arg: &str) -> String {
        format!("{}/{}?{}", self.base_url(), command, json_arg)
    }
}
