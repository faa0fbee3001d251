//! TCP control session with the player.
//!
//! A [`Session`] owns the socket once a player has been found. It runs one
//! receive loop per connection that decodes lines, forwards status lines to
//! the event queue and hands response lines to the [`Correlator`]. Commands
//! are written through the shared sink while the caller holds the
//! correlator's turn.
//!
//! The session never reconnects by itself: when the connection ends it emits
//! a single `Disconnected` event and waits for the owner to call
//! [`Session::connect`] again.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, Line, LineCodec, LineKind};
use super::command::Command;
use super::correlator::{Correlator, ResponseOutcome, Turn};
use super::discovery::{DeviceAnnouncement, DiscoveryListener};
use super::traits::CommandTransport;
use crate::config::Config;
use crate::error::{ErrorCode, OppoError, OppoResult};
use crate::events::{ConnectionEvent, DeviceEvent, DisconnectReason, StatusEvent};
use crate::runtime::{TaskSpawner, TokioSpawner};

/// Connection lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Waiting for an announcement.
    Discovering,
    /// Opening the TCP connection.
    Connecting,
    /// Commands may be sent.
    Connected,
    /// Idle until the owner calls `connect()`.
    #[default]
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// One TCP connection. A new link is created for every successful connect so
/// that a late teardown of an old connection cannot touch the current one.
struct Link {
    id: u64,
    close: CancellationToken,
    reason: Mutex<Option<DisconnectReason>>,
}

impl Link {
    fn new(id: u64) -> Self {
        Self {
            id,
            close: CancellationToken::new(),
            reason: Mutex::new(None),
        }
    }

    /// Asks the receive loop to end the link. The first reason wins.
    fn close(&self, reason: DisconnectReason) {
        self.reason.lock().get_or_insert(reason);
        self.close.cancel();
    }

    fn take_reason(&self) -> DisconnectReason {
        self.reason.lock().take().unwrap_or(DisconnectReason::Closed)
    }
}

/// Read half that remembers when bytes last arrived, complete line or not.
struct ActivityReader<R> {
    inner: R,
    last_read: Instant,
}

impl<R> ActivityReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            last_read: Instant::now(),
        }
    }

    fn last_read(&self) -> Instant {
        self.last_read
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ActivityReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.inner).poll_read(cx, buf);
        if matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > before {
            self.last_read = Instant::now();
        }
        polled
    }
}

/// Error handed to a command still waiting when its link ends.
fn pending_error(reason: &DisconnectReason) -> OppoError {
    match reason {
        DisconnectReason::FrameOverflow { limit } => OppoError::FrameOverflow { limit: *limit },
        other => OppoError::ConnectionLost(other.to_string()),
    }
}

type CommandSink = FramedWrite<OwnedWriteHalf, LineCodec>;
type LineStream = FramedRead<ActivityReader<OwnedReadHalf>, LineCodec>;

/// Start of the current quiet period: the last byte read or the last `#NOP`.
fn quiet_since(frames: &LineStream, nop_sent_at: Option<Instant>) -> Instant {
    let last_read = frames.get_ref().last_read();
    nop_sent_at.map_or(last_read, |at| at.max(last_read))
}

struct SessionInner {
    config: Config,
    events: mpsc::UnboundedSender<DeviceEvent>,
    correlator: Correlator,
    spawner: TokioSpawner,
    state: RwLock<ConnectionState>,
    device: RwLock<Option<DeviceAnnouncement>>,
    writer: tokio::sync::Mutex<Option<CommandSink>>,
    link: Mutex<Option<Arc<Link>>>,
    next_link_id: AtomicU64,
    probe_in_flight: AtomicBool,
    shutdown: CancellationToken,
}

/// Handle to the control session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Creates a disconnected session.
    ///
    /// Events are pushed to `events` in the order they happen; a
    /// [`crate::services::StatusDispatcher`] normally drains the other end.
    pub fn new(
        config: Config,
        events: mpsc::UnboundedSender<DeviceEvent>,
        spawner: TokioSpawner,
        shutdown: CancellationToken,
    ) -> Self {
        let correlator = Correlator::new(config.unmatched_response);
        Self {
            inner: Arc::new(SessionInner {
                config,
                events,
                correlator,
                spawner,
                state: RwLock::new(ConnectionState::Disconnected),
                device: RwLock::new(None),
                writer: tokio::sync::Mutex::new(None),
                link: Mutex::new(None),
                next_link_id: AtomicU64::new(1),
                probe_in_flight: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The most recently connected player, if any.
    pub fn device(&self) -> Option<DeviceAnnouncement> {
        self.inner.device.read().clone()
    }

    /// Number of response lines that arrived with no command waiting.
    pub fn orphaned_responses(&self) -> u64 {
        self.inner.correlator.orphaned_count()
    }

    /// Waits for a player announcement, then opens the control session.
    ///
    /// # Errors
    ///
    /// - [`OppoError::AlreadyConnected`] if the session is not disconnected
    /// - [`OppoError::Discovery`] if the announcement socket cannot be used
    /// - [`OppoError::Connect`] if the TCP connection fails
    /// - [`OppoError::ShuttingDown`] if shutdown fires first
    pub async fn connect(&self) -> OppoResult<DeviceAnnouncement> {
        self.inner.begin(ConnectionState::Discovering)?;
        let result = async {
            let announcement = self.inner.discover().await?;
            self.inner.set_state(ConnectionState::Connecting);
            self.inner.open(announcement).await
        }
        .await;
        self.inner.settle(result)
    }

    /// Opens the control session to a known endpoint, skipping discovery.
    pub async fn connect_to(
        &self,
        announcement: DeviceAnnouncement,
    ) -> OppoResult<DeviceAnnouncement> {
        self.inner.begin(ConnectionState::Connecting)?;
        let result = self.inner.open(announcement).await;
        self.inner.settle(result)
    }

    /// Sends a command and returns the raw response line.
    ///
    /// Commands are serialized: a second caller waits for the first response
    /// (or timeout) before its command is written. `timeout` covers both the
    /// wait for a turn and the wait for the response.
    pub async fn send(&self, command: &Command, timeout: Duration) -> OppoResult<String> {
        self.inner.send(command, timeout).await
    }

    /// Closes the current connection. A `Disconnected` event follows.
    pub fn disconnect(&self) {
        if let Some(link) = self.inner.link.lock().clone() {
            link.close(DisconnectReason::Closed);
        }
    }

    /// Stops the session for good.
    ///
    /// Any open connection is torn down and its `Disconnected` event is queued
    /// before this returns.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let current = self.inner.link.lock().as_ref().map(|link| link.id);
        if let Some(id) = current {
            self.inner.finish_link(id, DisconnectReason::Shutdown).await;
        }
    }
}

impl SessionInner {
    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            log::debug!("[Session] {} -> {}", previous, state);
        }
    }

    /// Claims the session for a connect attempt.
    fn begin(&self, state: ConnectionState) -> OppoResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(OppoError::ShuttingDown);
        }
        let mut current = self.state.write();
        if *current != ConnectionState::Disconnected {
            return Err(OppoError::AlreadyConnected);
        }
        *current = state;
        Ok(())
    }

    /// Resets the state after a failed connect attempt.
    fn settle(&self, result: OppoResult<DeviceAnnouncement>) -> OppoResult<DeviceAnnouncement> {
        if let Err(e) = &result {
            log::warn!("[Session] Connect failed: {}", e);
            self.set_state(ConnectionState::Disconnected);
        }
        result
    }

    async fn discover(&self) -> OppoResult<DeviceAnnouncement> {
        let listener = DiscoveryListener::bind(
            self.config.discovery_port,
            self.config.ignored_announcements.clone(),
        )?;
        log::info!(
            "[Session] Waiting for player announcement on UDP {}",
            self.config.discovery_port
        );
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(OppoError::ShuttingDown),
            found = listener.next_announcement() => Ok(found?),
        }
    }

    async fn open(self: &Arc<Self>, announcement: DeviceAnnouncement) -> OppoResult<DeviceAnnouncement> {
        let addr = announcement.socket_addr();
        let connect_timeout = self.config.connect_timeout();
        log::info!("[Session] Connecting to {} at {}", announcement.name, addr);

        let stream = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(OppoError::ShuttingDown),
            result = tokio::time::timeout(connect_timeout, TcpStream::connect(addr)) => {
                result
                    .map_err(|_| {
                        OppoError::Connect(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            format!("no answer from {} within {:?}", addr, connect_timeout),
                        ))
                    })?
                    .map_err(OppoError::Connect)?
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[Session] Failed to set TCP_NODELAY: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let max_line = self.config.max_line_length;
        let link = Arc::new(Link::new(self.next_link_id.fetch_add(1, Ordering::Relaxed)));

        *self.writer.lock().await = Some(FramedWrite::new(write_half, LineCodec::new(max_line)));
        *self.link.lock() = Some(Arc::clone(&link));
        *self.device.write() = Some(announcement.clone());
        self.probe_in_flight.store(false, Ordering::Release);
        self.set_state(ConnectionState::Connected);

        log::info!("[Session] Connected to {} at {}", announcement.name, addr);
        self.emit(ConnectionEvent::connected(announcement.clone()).into());

        let frames = FramedRead::new(ActivityReader::new(read_half), LineCodec::new(max_line));
        let inner = Arc::clone(self);
        self.spawner.spawn(async move {
            inner.receive_loop(link, frames).await;
        });

        Ok(announcement)
    }

    fn emit(&self, event: DeviceEvent) {
        if self.events.send(event).is_err() {
            log::trace!("[Session] Event queue closed, event discarded");
        }
    }

    fn ensure_connected(&self) -> OppoResult<()> {
        if *self.state.read() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(OppoError::NotConnected)
        }
    }

    async fn send(&self, command: &Command, timeout: Duration) -> OppoResult<String> {
        self.ensure_connected()?;
        let deadline = Instant::now() + timeout;
        let turn = self
            .correlator
            .acquire(command.verb(), deadline, timeout)
            .await?;
        self.exchange(turn, command, deadline, timeout).await
    }

    /// Writes `command` and waits for its response while holding `turn`.
    async fn exchange(
        &self,
        mut turn: Turn<'_>,
        command: &Command,
        deadline: Instant,
        timeout: Duration,
    ) -> OppoResult<String> {
        // The connection may have dropped while this caller was queued.
        self.ensure_connected()?;

        turn.register();
        tokio::time::timeout_at(deadline, self.write(command))
            .await
            .map_err(|_| OppoError::Timeout {
                verb: command.verb().to_string(),
                timeout,
            })??;
        turn.wait().await
    }

    async fn write(&self, command: &Command) -> OppoResult<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(OppoError::NotConnected)?;
        if let Err(e) = sink.send(command).await {
            drop(writer);
            let message = e.to_string();
            log::warn!("[Session] Write of {} failed: {}", command.verb(), message);
            if let Some(link) = self.link.lock().clone() {
                link.close(DisconnectReason::WriteFailed(message.clone()));
            }
            return Err(OppoError::ConnectionLost(message));
        }
        Ok(())
    }

    async fn receive_loop(self: Arc<Self>, link: Arc<Link>, mut frames: LineStream) {
        let idle = self.config.idle_probe_interval();
        let mut nop_sent_at = None;
        let reason = loop {
            let nop_due = quiet_since(&frames, nop_sent_at) + idle;
            tokio::select! {
                _ = self.shutdown.cancelled() => break DisconnectReason::Shutdown,
                _ = link.close.cancelled() => break link.take_reason(),
                _ = tokio::time::sleep_until(nop_due) => {
                    // Bytes of an unfinished line may have arrived meanwhile.
                    if quiet_since(&frames, nop_sent_at) + idle <= Instant::now() {
                        nop_sent_at = Some(Instant::now());
                        self.probe(&link);
                    }
                }
                next = frames.next() => match next {
                    None => break DisconnectReason::PeerClosed,
                    Some(Ok(line)) => {
                        if let Some(reason) = self.route(line) {
                            break reason;
                        }
                    }
                    Some(Err(err)) => {
                        log::error!("[Session] Read failed [{}]: {}", err.code(), err);
                        break match err {
                            CodecError::Overflow { limit } => DisconnectReason::FrameOverflow { limit },
                            CodecError::Io(e) => DisconnectReason::ReadFailed(e.to_string()),
                        };
                    }
                },
            }
        };
        drop(frames);
        self.finish_link(link.id, reason).await;
    }

    /// Routes a decoded line. Returns a reason when the link must end.
    fn route(&self, line: Line) -> Option<DisconnectReason> {
        match line.kind {
            LineKind::Status => {
                log::trace!("[Session] Status: {}", line.text);
                self.emit(StatusEvent::from_line(line.text).into());
                None
            }
            LineKind::Response => match self.correlator.complete(line.text) {
                ResponseOutcome::Delivered | ResponseOutcome::Orphaned { disconnect: false } => {
                    None
                }
                ResponseOutcome::Orphaned { disconnect: true } => {
                    Some(DisconnectReason::UnmatchedResponse)
                }
            },
        }
    }

    /// Sends a `#NOP` after an idle period. At most one probe runs at a time.
    ///
    /// Nothing is queued behind a command already holding the stream. Only a
    /// written `#NOP` that goes unanswered drops the link.
    fn probe(self: &Arc<Self>, link: &Arc<Link>) {
        if self.probe_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(self);
        let link = Arc::clone(link);
        self.spawner.spawn(async move {
            let nop = Command::nop();
            let timeout = inner.config.command_timeout();
            let deadline = Instant::now() + timeout;
            let Some(turn) = inner.correlator.try_acquire(nop.verb(), deadline, timeout) else {
                log::debug!("[Session] Command in flight, skipping idle NOP");
                inner.probe_in_flight.store(false, Ordering::Release);
                return;
            };
            log::debug!(
                "[Session] No data for {:?}, probing",
                inner.config.idle_probe_interval()
            );
            match inner.exchange(turn, &nop, deadline, timeout).await {
                Ok(response) => log::trace!("[Session] Probe answered: {}", response),
                Err(OppoError::Timeout { .. }) => {
                    log::warn!("[Session] Probe unanswered, dropping connection");
                    link.close(DisconnectReason::ProbeUnanswered);
                }
                Err(e) => log::debug!("[Session] Probe failed: {}", e),
            }
            inner.probe_in_flight.store(false, Ordering::Release);
        });
    }

    /// Tears down the link with the given id if it is still current.
    ///
    /// Emits exactly one `Disconnected` event per link.
    async fn finish_link(&self, link_id: u64, reason: DisconnectReason) {
        {
            let mut current = self.link.lock();
            match current.as_ref() {
                Some(link) if link.id == link_id => {
                    current.take();
                }
                _ => return,
            }
        }

        // Writer first, so a caller registering after fail_pending cannot write.
        self.writer.lock().await.take();
        self.set_state(ConnectionState::Disconnected);
        self.correlator.fail_pending(pending_error(&reason));

        log::info!("[Session] Disconnected: {}", reason);
        self.emit(ConnectionEvent::disconnected(reason).into());
    }
}

#[async_trait]
impl CommandTransport for Session {
    async fn send(&self, command: &Command, timeout: Duration) -> OppoResult<String> {
        Session::send(self, command, timeout).await
    }

    fn device(&self) -> Option<DeviceAnnouncement> {
        Session::device(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    struct Harness {
        session: Session,
        events: mpsc::UnboundedReceiver<DeviceEvent>,
        listener: TcpListener,
        addr: SocketAddr,
    }

    async fn harness(config: Config) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, events) = mpsc::unbounded_channel();
        let session = Session::new(config, tx, TokioSpawner::current(), CancellationToken::new());
        Harness {
            session,
            events,
            listener,
            addr,
        }
    }

    /// Fake player end of the connection.
    struct Device {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl Device {
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, w) = stream.into_split();
            Self {
                reader: BufReader::new(r),
                writer: w,
            }
        }

        async fn read_command(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            line
        }

        async fn reply(&mut self, text: &str) {
            self.writer.write_all(text.as_bytes()).await.unwrap();
        }
    }

    async fn connected(config: Config) -> (Harness, Device) {
        let mut h = harness(config).await;
        let announcement = DeviceAnnouncement::direct("Test", h.addr);
        let (result, device) = tokio::join!(
            h.session.connect_to(announcement),
            Device::accept(&h.listener)
        );
        result.unwrap();
        match h.events.recv().await.unwrap() {
            DeviceEvent::Connection(ConnectionEvent::Connected { device, .. }) => {
                assert_eq!(device.name, "Test");
            }
            other => panic!("expected Connected, got {:?}", other),
        }
        (h, device)
    }

    async fn next_disconnect(events: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> DisconnectReason {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("no Disconnected event")
                .unwrap();
            if let DeviceEvent::Connection(ConnectionEvent::Disconnected { reason, .. }) = event {
                return reason;
            }
        }
    }

    fn cmd(text: &str) -> Command {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let h = harness(Config::default()).await;
        let err = h
            .session
            .send(&cmd("QVM"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OppoError::NotConnected));
        assert_eq!(h.session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn command_round_trip() {
        let (h, mut device) = connected(Config::default()).await;
        assert!(h.session.is_connected());

        let session = h.session.clone();
        let call = tokio::spawn(async move { session.send(&cmd("QVM"), Duration::from_secs(2)).await });

        assert_eq!(device.read_command().await, "#QVM\r\n");
        device.reply("OK 2\r").await;
        assert_eq!(call.await.unwrap().unwrap(), "OK 2");
    }

    #[tokio::test]
    async fn status_lines_are_routed_to_events_not_responses() {
        let (mut h, mut device) = connected(Config::default()).await;

        let session = h.session.clone();
        let call = tokio::spawn(async move { session.send(&cmd("PLA"), Duration::from_secs(2)).await });
        assert_eq!(device.read_command().await, "#PLA\r\n");
        device.reply("@@UPL PLAY\rOK\r@@UTC 000 000 C 00:00:01\r").await;

        assert_eq!(call.await.unwrap().unwrap(), "OK");
        let mut lines = Vec::new();
        for _ in 0..2 {
            match h.events.recv().await.unwrap() {
                DeviceEvent::Status(s) => lines.push(s.line),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(lines, vec!["@@UPL PLAY", "@@UTC 000 000 C 00:00:01"]);
    }

    #[tokio::test]
    async fn unanswered_command_times_out_and_session_survives() {
        let (h, mut device) = connected(Config::default()).await;
        let started = std::time::Instant::now();

        let err = h
            .session
            .send(&cmd("QVM"), Duration::from_millis(100))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, OppoError::Timeout { .. }));
        assert!(elapsed >= Duration::from_millis(95), "returned early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(1), "returned late: {:?}", elapsed);
        assert!(h.session.is_connected());
        assert_eq!(device.read_command().await, "#QVM\r\n");

        // The late answer is discarded rather than given to the next caller.
        device.reply("OK 2\r").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.session.orphaned_responses(), 1);
    }

    #[tokio::test]
    async fn concurrent_sends_are_serialized() {
        let (h, mut device) = connected(Config::default()).await;

        let first = {
            let session = h.session.clone();
            tokio::spawn(async move { session.send(&cmd("PLA"), Duration::from_secs(2)).await })
        };
        assert_eq!(device.read_command().await, "#PLA\r\n");

        let second = {
            let session = h.session.clone();
            tokio::spawn(async move { session.send(&cmd("PAU"), Duration::from_secs(2)).await })
        };

        // Nothing else may be written while PLA is outstanding.
        let mut early = String::new();
        let premature = tokio::time::timeout(
            Duration::from_millis(100),
            device.reader.read_line(&mut early),
        )
        .await;
        assert!(premature.is_err(), "second command written early: {:?}", early);

        device.reply("OK\r").await;
        assert_eq!(first.await.unwrap().unwrap(), "OK");

        assert_eq!(device.read_command().await, "#PAU\r\n");
        device.reply("OK\r").await;
        assert_eq!(second.await.unwrap().unwrap(), "OK");
    }

    #[tokio::test]
    async fn peer_close_emits_one_disconnect_and_rejects_sends() {
        let (mut h, device) = connected(Config::default()).await;
        drop(device);

        assert_eq!(next_disconnect(&mut h.events).await, DisconnectReason::PeerClosed);
        assert_eq!(h.session.state(), ConnectionState::Disconnected);

        let err = h
            .session
            .send(&cmd("QVM"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OppoError::NotConnected));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err(), "only one Disconnected expected");
    }

    #[tokio::test]
    async fn pending_command_fails_when_connection_drops() {
        let (h, mut device) = connected(Config::default()).await;
        let session = h.session.clone();
        let call = tokio::spawn(async move { session.send(&cmd("QDS"), Duration::from_secs(5)).await });

        assert_eq!(device.read_command().await, "#QDS\r\n");
        drop(device);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, OppoError::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn reconnect_after_disconnect() {
        let (mut h, device) = connected(Config::default()).await;
        drop(device);
        next_disconnect(&mut h.events).await;

        let announcement = DeviceAnnouncement::direct("Test", h.addr);
        let (result, mut device) = tokio::join!(
            h.session.connect_to(announcement),
            Device::accept(&h.listener)
        );
        result.unwrap();
        assert!(h.session.is_connected());

        let session = h.session.clone();
        let call = tokio::spawn(async move { session.send(&cmd("QVM"), Duration::from_secs(2)).await });
        assert_eq!(device.read_command().await, "#QVM\r\n");
        device.reply("OK 1\r").await;
        assert_eq!(call.await.unwrap().unwrap(), "OK 1");
    }

    #[tokio::test]
    async fn connect_while_connected_is_rejected() {
        let (h, _device) = connected(Config::default()).await;
        let err = h
            .session
            .connect_to(DeviceAnnouncement::direct("Other", h.addr))
            .await
            .unwrap_err();
        assert!(matches!(err, OppoError::AlreadyConnected));
        assert!(h.session.is_connected());
    }

    #[tokio::test]
    async fn overlong_line_is_fatal_to_the_session() {
        let config = Config {
            max_line_length: 16,
            ..Default::default()
        };
        let (mut h, mut device) = connected(config).await;
        device.reply(&"X".repeat(64)).await;

        assert_eq!(
            next_disconnect(&mut h.events).await,
            DisconnectReason::FrameOverflow { limit: 16 }
        );
        assert!(!h.session.is_connected());
    }

    #[tokio::test]
    async fn overlong_line_fails_the_waiting_command() {
        let config = Config {
            max_line_length: 16,
            ..Default::default()
        };
        let (mut h, mut device) = connected(config).await;
        let session = h.session.clone();
        let call = tokio::spawn(async move { session.send(&cmd("QDR"), Duration::from_secs(5)).await });

        assert_eq!(device.read_command().await, "#QDR\r\n");
        device.reply(&format!("OK D {}", "M".repeat(64))).await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, OppoError::FrameOverflow { limit: 16 }));
        assert_eq!(err.code(), "frame_overflow");
        assert_eq!(
            next_disconnect(&mut h.events).await,
            DisconnectReason::FrameOverflow { limit: 16 }
        );
    }

    #[tokio::test]
    async fn unmatched_response_can_drop_the_connection() {
        let config = Config {
            unmatched_response: crate::config::UnmatchedResponsePolicy::Disconnect,
            ..Default::default()
        };
        let (mut h, mut device) = connected(config).await;
        device.reply("OK\r").await;

        assert_eq!(
            next_disconnect(&mut h.events).await,
            DisconnectReason::UnmatchedResponse
        );
    }

    #[tokio::test]
    async fn idle_connection_is_probed_and_dropped_when_silent() {
        let config = Config {
            idle_probe_secs: 1,
            command_timeout_ms: 200,
            ..Default::default()
        };
        let (mut h, mut device) = connected(config).await;

        let probe = tokio::time::timeout(Duration::from_secs(3), device.read_command())
            .await
            .expect("no probe sent");
        assert_eq!(probe, "#NOP\r\n");

        assert_eq!(
            next_disconnect(&mut h.events).await,
            DisconnectReason::ProbeUnanswered
        );
    }

    #[tokio::test]
    async fn answered_probe_keeps_the_connection() {
        let config = Config {
            idle_probe_secs: 1,
            command_timeout_ms: 500,
            ..Default::default()
        };
        let (h, mut device) = connected(config).await;

        let probe = tokio::time::timeout(Duration::from_secs(3), device.read_command())
            .await
            .expect("no probe sent");
        assert_eq!(probe, "#NOP\r\n");
        device.reply("OK\r").await;

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(h.session.is_connected());
    }

    #[tokio::test]
    async fn slow_answer_survives_the_idle_interval() {
        let config = Config {
            idle_probe_secs: 1,
            command_timeout_ms: 200,
            ..Default::default()
        };
        let (mut h, mut device) = connected(config).await;

        let session = h.session.clone();
        let call = tokio::spawn(async move { session.send(&cmd("QDS"), Duration::from_secs(5)).await });
        assert_eq!(device.read_command().await, "#QDS\r\n");

        // The idle interval passes while QDS is outstanding; no NOP may be queued.
        let mut early = String::new();
        let written = tokio::time::timeout(
            Duration::from_millis(1500),
            device.reader.read_line(&mut early),
        )
        .await;
        assert!(written.is_err(), "unexpected write: {:?}", early);

        device.reply("OK 12\r").await;
        assert_eq!(call.await.unwrap().unwrap(), "OK 12");
        assert!(h.session.is_connected());
        assert!(h.events.try_recv().is_err(), "connection should survive");
    }

    #[tokio::test]
    async fn trickling_bytes_count_as_activity() {
        let config = Config {
            idle_probe_secs: 1,
            command_timeout_ms: 200,
            ..Default::default()
        };
        let (mut h, device) = connected(config).await;
        let Device {
            mut reader,
            mut writer,
        } = device;

        let trickle = async {
            for byte in b"@@UPL PLAY\r" {
                writer.write_all(&[*byte]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
        };
        let quiet = async {
            let mut line = String::new();
            tokio::time::timeout(Duration::from_millis(2500), reader.read_line(&mut line))
                .await
                .is_err()
        };
        let ((), quiet) = tokio::join!(trickle, quiet);
        assert!(quiet, "NOP sent while a line was still arriving");

        match h.events.recv().await.unwrap() {
            DeviceEvent::Status(status) => assert_eq!(status.line, "@@UPL PLAY"),
            other => panic!("expected status, got {:?}", other),
        }
        assert!(h.session.is_connected());
    }

    #[tokio::test]
    async fn connect_discovers_then_opens_session() {
        let free = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let discovery_port = free.local_addr().unwrap().port();
        drop(free);

        let config = Config {
            discovery_port,
            ..Default::default()
        };
        let mut h = harness(config).await;
        let decoy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let start = format!(
            "Notify:OPPO Player Start Server IP:127.0.0.1 Server Port:{} Server Name:Decoy",
            decoy.local_addr().unwrap().port()
        );
        let online = format!(
            "Notify:OPPO Player Online Server IP:127.0.0.1 Server Port:{} Server Name:BDP-103",
            h.addr.port()
        );
        let announcer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], discovery_port));

        let session = h.session.clone();
        let connecting = tokio::spawn(async move { session.connect().await });

        // Boot announcements alone never complete discovery.
        for _ in 0..6 {
            announcer.send_to(start.as_bytes(), target).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!connecting.is_finished());
        assert_eq!(h.session.state(), ConnectionState::Discovering);

        while !connecting.is_finished() {
            announcer.send_to(online.as_bytes(), target).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let found = connecting.await.unwrap().unwrap();
        assert_eq!(found.message, "OPPO Player Online");
        assert_eq!(found.name, "BDP-103");
        assert_eq!(found.socket_addr(), h.addr);

        let _device = Device::accept(&h.listener).await;
        match h.events.recv().await.unwrap() {
            DeviceEvent::Connection(ConnectionEvent::Connected { device, .. }) => {
                assert_eq!(device.name, "BDP-103");
            }
            other => panic!("expected Connected, got {:?}", other),
        }
        assert!(h.session.is_connected());
        assert_eq!(h.session.device().map(|d| d.name), Some("BDP-103".to_string()));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), decoy.accept())
                .await
                .is_err(),
            "boot announcement must not be connected to"
        );
    }

    #[tokio::test]
    async fn shutdown_emits_disconnect_and_blocks_reconnect() {
        let (mut h, _device) = connected(Config::default()).await;
        h.session.shutdown().await;

        assert_eq!(next_disconnect(&mut h.events).await, DisconnectReason::Shutdown);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err());

        let err = h
            .session
            .connect_to(DeviceAnnouncement::direct("Test", h.addr))
            .await
            .unwrap_err();
        assert!(matches!(err, OppoError::ShuttingDown));
    }

    #[tokio::test]
    async fn owner_disconnect_reports_closed() {
        let (mut h, _device) = connected(Config::default()).await;
        h.session.disconnect();
        assert_eq!(next_disconnect(&mut h.events).await, DisconnectReason::Closed);
    }
}
