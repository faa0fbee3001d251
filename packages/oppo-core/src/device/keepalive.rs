//! Registration broadcaster.
//!
//! The player only pushes notifications to hosts that have recently sent the
//! `NOTIFY OREMOTE LOGIN` datagram. The broadcaster sends it every second until
//! some peer answers, then backs off to once every ten minutes. It shares no
//! state with the command session.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::IpDetector;
use crate::device::discovery::{DiscoveryError, DiscoveryResult};
use crate::protocol_constants::{ANNOUNCEMENT_PREFIX, KEEPALIVE_MESSAGE, PLAYER_START_MESSAGE};

const RECV_BUFFER_SIZE: usize = 1024;

/// Pause after a receive error so a persistently failing socket cannot spin.
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Send cadence state machine.
#[derive(Debug, Clone)]
pub struct KeepaliveSchedule {
    initial: Duration,
    established: Duration,
    reply_seen: bool,
    last_sent: Option<Instant>,
}

impl KeepaliveSchedule {
    pub fn new(initial: Duration, established: Duration) -> Self {
        Self {
            initial,
            established,
            reply_seen: false,
            last_sent: None,
        }
    }

    /// Current interval between registrations.
    pub fn interval(&self) -> Duration {
        if self.reply_seen {
            self.established
        } else {
            self.initial
        }
    }

    /// When the next registration is due. The first one is due immediately.
    pub fn next_send_at(&self, now: Instant) -> Instant {
        match self.last_sent {
            Some(last) => last + self.interval(),
            None => now,
        }
    }

    pub fn mark_sent(&mut self, at: Instant) {
        self.last_sent = Some(at);
    }

    /// Records a reply. Returns true on the first one.
    pub fn record_reply(&mut self) -> bool {
        !std::mem::replace(&mut self.reply_seen, true)
    }

    pub fn reply_seen(&self) -> bool {
        self.reply_seen
    }
}

/// What a datagram received on the registration socket means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    /// Sent from one of this host's addresses.
    FromSelf,
    /// Our own registration text, looped back through another path.
    OwnRegistration,
    /// A boot announcement or another ignored message, which is not a reply to us.
    PlayerStart,
    /// A liveness reply from a peer.
    Reply,
}

/// Classifies a datagram received on the registration socket.
///
/// Announcements whose message starts with one of `ignored` (ignoring case)
/// are never replies. Empty entries match nothing.
pub fn classify_packet(
    from: IpAddr,
    payload: &[u8],
    local_addrs: &[IpAddr],
    ignored: &[String],
) -> PacketDisposition {
    if local_addrs.contains(&from) {
        return PacketDisposition::FromSelf;
    }
    let text = String::from_utf8_lossy(payload);
    let text = text.trim();
    if text == KEEPALIVE_MESSAGE {
        return PacketDisposition::OwnRegistration;
    }
    let is_ignored = text.strip_prefix(ANNOUNCEMENT_PREFIX).is_some_and(|rest| {
        ignored.iter().any(|message| {
            !message.is_empty()
                && rest
                    .get(..message.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(message))
        })
    });
    if is_ignored {
        return PacketDisposition::PlayerStart;
    }
    PacketDisposition::Reply
}

/// The configured ignore list, always including the player's boot message.
fn ignored_messages(configured: &[String]) -> Vec<String> {
    let mut ignored: Vec<String> = configured
        .iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    if !ignored
        .iter()
        .any(|m| m.eq_ignore_ascii_case(PLAYER_START_MESSAGE))
    {
        ignored.push(PLAYER_START_MESSAGE.to_string());
    }
    ignored
}

fn create_socket(bind_addr: SocketAddr) -> DiscoveryResult<UdpSocket> {
    let domain = if bind_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket =
        Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(DiscoveryError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[Keepalive] Failed to set SO_REUSEADDR: {}", e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[Keepalive] Failed to set SO_REUSEPORT: {}", e);
    }

    socket
        .set_broadcast(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .set_nonblocking(true)
        .map_err(DiscoveryError::SocketBind)?;
    socket
        .bind(&bind_addr.into())
        .map_err(DiscoveryError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(DiscoveryError::SocketBind)
}

/// Sends the registration datagram on the schedule and watches for replies.
pub struct KeepaliveBroadcaster {
    socket: UdpSocket,
    target: SocketAddr,
    schedule: KeepaliveSchedule,
    ip_detector: Arc<dyn IpDetector>,
    ignored: Vec<String>,
    established: Arc<AtomicBool>,
}

impl KeepaliveBroadcaster {
    /// Binds the registration socket on `bind_ip` and the configured port.
    pub fn bind(
        bind_ip: IpAddr,
        config: &Config,
        ip_detector: Arc<dyn IpDetector>,
    ) -> DiscoveryResult<Self> {
        let socket = create_socket(SocketAddr::new(bind_ip, config.keepalive_port))?;
        Ok(Self {
            socket,
            target: config.keepalive_target,
            schedule: KeepaliveSchedule::new(
                config.keepalive_initial_interval(),
                config.keepalive_established_interval(),
            ),
            ip_detector,
            ignored: ignored_messages(&config.ignored_announcements),
            established: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> DiscoveryResult<SocketAddr> {
        self.socket.local_addr().map_err(DiscoveryError::SocketBind)
    }

    /// Flag that becomes true once a peer has replied.
    pub fn established_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.established)
    }

    /// Runs until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        let local_addrs = match self.ip_detector.local_addresses() {
            Ok(addrs) => addrs,
            Err(e) => {
                log::warn!("[Keepalive] Could not list local addresses: {}", e);
                Vec::new()
            }
        };
        log::info!(
            "[Keepalive] Registering with {} every {:?}",
            self.target,
            self.schedule.interval()
        );

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let due = self.schedule.next_send_at(Instant::now());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(due) => {
                    if let Err(e) = self
                        .socket
                        .send_to(KEEPALIVE_MESSAGE.as_bytes(), self.target)
                        .await
                    {
                        log::warn!("[Keepalive] Send to {} failed: {}", self.target, e);
                    } else {
                        log::trace!("[Keepalive] -> {}", self.target);
                    }
                    self.schedule.mark_sent(Instant::now());
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.on_packet(from, &buf[..len], &local_addrs),
                    Err(e) => {
                        log::debug!("[Keepalive] Receive failed: {}", e);
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
                        }
                    }
                },
            }
        }
        log::info!("[Keepalive] Stopped");
    }

    fn on_packet(&mut self, from: SocketAddr, payload: &[u8], local_addrs: &[IpAddr]) {
        match classify_packet(from.ip(), payload, local_addrs, &self.ignored) {
            PacketDisposition::Reply => {
                if self.schedule.record_reply() {
                    self.established.store(true, Ordering::Release);
                    log::info!(
                        "[Keepalive] Reply from {}, backing off to {:?}",
                        from,
                        self.schedule.interval()
                    );
                } else {
                    log::trace!("[Keepalive] Reply from {}", from);
                }
            }
            other => log::debug!("[Keepalive] Filtered {:?} packet from {}", other, from),
        }
    }
}
