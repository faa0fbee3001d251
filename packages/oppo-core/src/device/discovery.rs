//! UDP discovery of the player's control session.
//!
//! The player periodically broadcasts an announcement of the form
//!
//! ```text
//! Notify:<message> Server IP:<ip> Server Port:<port> Server Name:<name>
//! ```
//!
//! [`DiscoveryListener`] binds the announcement port and waits for the first
//! packet that parses. Everything else on the port (our own keepalive
//! broadcasts, truncated packets, start notifications) is skipped.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;

use crate::protocol_constants::ANNOUNCEMENT_PREFIX;

/// Receive buffer for one announcement datagram.
const RECV_BUFFER_SIZE: usize = 2048;

const IP_FIELD: &str = "Server IP:";
const PORT_FIELD: &str = "Server Port:";
const NAME_FIELD: &str = "Server Name:";

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Failed to create or bind the announcement socket.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Receiving from the announcement socket failed.
    #[error("failed to receive announcement: {0}")]
    Receive(#[source] std::io::Error),

    /// The packet is not an announcement at all.
    #[error("not an announcement")]
    NotAnnouncement,

    /// The packet looks like an announcement but a field is missing or invalid.
    #[error("malformed announcement: {0}")]
    Malformed(String),
}

/// Convenient Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// A player's control session endpoint as announced over UDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAnnouncement {
    /// The announced message name (e.g. `OPPO Player Online`).
    pub message: String,
    /// Friendly device name.
    pub name: String,
    /// Address of the control session.
    pub address: IpAddr,
    /// TCP port of the control session.
    pub port: u16,
}

impl DeviceAnnouncement {
    /// Creates an announcement for a known endpoint, bypassing discovery.
    pub fn direct(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            message: String::new(),
            name: name.into(),
            address: addr.ip(),
            port: addr.port(),
        }
    }

    /// The TCP endpoint to connect to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Returns the length of the leading run of characters accepted by `pred`.
fn leading_len(s: &str, pred: impl Fn(char) -> bool) -> usize {
    s.char_indices()
        .find(|(_, c)| !pred(*c))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Consumes exactly one whitespace character followed by `field`.
fn expect_field<'a>(s: &'a str, field: &'static str) -> DiscoveryResult<&'a str> {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_whitespace() => {}
        _ => return Err(DiscoveryError::Malformed(format!("missing {}", field))),
    }
    chars
        .as_str()
        .strip_prefix(field)
        .ok_or_else(|| DiscoveryError::Malformed(format!("missing {}", field)))
}

/// Parses an announcement packet.
///
/// The message name may itself contain spaces; the address fields are located
/// from the last `Server IP:` marker that is followed by a complete field set.
///
/// # Errors
///
/// Returns [`DiscoveryError::NotAnnouncement`] if the packet has no `Notify:`
/// marker and [`DiscoveryError::Malformed`] if any field is missing or invalid.
pub fn parse_announcement(packet: &str) -> DiscoveryResult<DeviceAnnouncement> {
    let start = packet
        .find(ANNOUNCEMENT_PREFIX)
        .ok_or(DiscoveryError::NotAnnouncement)?;
    let body = &packet[start + ANNOUNCEMENT_PREFIX.len()..];

    let mut last_err = DiscoveryError::Malformed(format!("missing {}", IP_FIELD));
    let mut search_end = body.len();
    while let Some(marker) = body[..search_end].rfind(IP_FIELD) {
        search_end = marker;
        // The marker must be preceded by a whitespace character.
        let Some(ws) = body[..marker].chars().next_back().filter(|c| c.is_whitespace()) else {
            continue;
        };
        let message = &body[..marker - ws.len_utf8()];
        match parse_fields(message, &body[marker - ws.len_utf8()..]) {
            Ok(announcement) => return Ok(announcement),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn parse_fields(message: &str, rest: &str) -> DiscoveryResult<DeviceAnnouncement> {
    let rest = expect_field(rest, IP_FIELD)?;
    let ip_len = leading_len(rest, |c| c.is_ascii_digit() || c == '.');
    let address: Ipv4Addr = rest[..ip_len]
        .parse()
        .map_err(|_| DiscoveryError::Malformed(format!("invalid address {:?}", &rest[..ip_len])))?;

    let rest = expect_field(&rest[ip_len..], PORT_FIELD)?;
    let port_len = leading_len(rest, |c| c.is_ascii_digit());
    let port: u16 = rest[..port_len]
        .parse()
        .map_err(|_| DiscoveryError::Malformed(format!("invalid port {:?}", &rest[..port_len])))?;

    let rest = expect_field(&rest[port_len..], NAME_FIELD)?;
    let name_len = leading_len(rest, |c| c.is_alphanumeric() || c == '_' || c == ' ' || c == '-');
    let name = rest[..name_len].trim_end();
    if name.is_empty() {
        return Err(DiscoveryError::Malformed("empty name".to_string()));
    }

    Ok(DeviceAnnouncement {
        message: message.to_string(),
        name: name.to_string(),
        address: IpAddr::V4(address),
        port,
    })
}

/// Creates the announcement socket.
///
/// The keepalive broadcaster shares the same well-known port, so address and
/// port reuse are both requested.
fn create_socket(port: u16) -> DiscoveryResult<UdpSocket> {
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[Discovery] Failed to set SO_REUSEADDR: {}", e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[Discovery] Failed to set SO_REUSEPORT: {}", e);
    }

    if let Err(e) = socket.set_broadcast(true) {
        log::warn!("[Discovery] Failed to set SO_BROADCAST: {}", e);
    }

    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// One-shot listener for player announcements.
pub struct DiscoveryListener {
    socket: UdpSocket,
    ignored: Vec<String>,
}

impl DiscoveryListener {
    /// Binds the announcement port.
    ///
    /// Announcements whose message name is in `ignored` never complete discovery.
    pub fn bind(port: u16, ignored: Vec<String>) -> DiscoveryResult<Self> {
        let socket = create_socket(port)?;
        Ok(Self { socket, ignored })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> DiscoveryResult<SocketAddr> {
        self.socket.local_addr().map_err(DiscoveryError::SocketBind)
    }

    /// Waits for the first valid, non-ignored announcement.
    ///
    /// Malformed packets are logged and skipped. This future never completes
    /// unless an announcement arrives or the socket fails; callers race it
    /// against their own cancellation.
    pub async fn next_announcement(&self) -> DiscoveryResult<DeviceAnnouncement> {
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(DiscoveryError::Receive)?;
            let text = String::from_utf8_lossy(&buf[..len]);

            match parse_announcement(&text) {
                Ok(announcement) if self.is_ignored(&announcement) => {
                    log::debug!(
                        "[Discovery] Ignoring '{}' announcement from {}",
                        announcement.message,
                        from
                    );
                }
                Ok(announcement) => {
                    log::info!(
                        "[Discovery] Found {} at {} (announced by {})",
                        announcement.name,
                        announcement.socket_addr(),
                        from
                    );
                    return Ok(announcement);
                }
                Err(e) => {
                    log::debug!("[Discovery] Skipping packet from {}: {}", from, e);
                }
            }
        }
    }

    fn is_ignored(&self, announcement: &DeviceAnnouncement) -> bool {
        self.ignored
            .iter()
            .any(|m| m.eq_ignore_ascii_case(announcement.message.trim()))
    }
}
