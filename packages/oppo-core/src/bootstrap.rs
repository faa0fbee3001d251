//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::{IpDetector, LocalIpDetector};
use crate::device::{HttpPlayerApi, KeepaliveBroadcaster, OppoClient, Session};
use crate::error::{ErrorCode, OppoError, OppoResult};
use crate::events::EventEmitter;
use crate::runtime::TokioSpawner;
use crate::services::StatusDispatcher;

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    /// The control session. The owner decides when to `connect()`.
    pub session: Session,
    /// Typed command surface over the session.
    pub client: OppoClient,
    /// Delivers session events to the subscriber.
    pub dispatcher: Arc<StatusDispatcher>,
    /// True once the player has answered the registration broadcast.
    pub keepalive_established: Arc<AtomicBool>,
    keepalive: Mutex<Option<KeepaliveBroadcaster>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Starts the dispatcher and the keepalive broadcaster.
    ///
    /// Calling this more than once has no further effect.
    pub fn start_background_tasks(&self) {
        let mut tasks = self.tasks.lock();
        if let Some(handle) = self.dispatcher.start(self.cancel_token.clone()) {
            tasks.push(handle);
        }
        if let Some(keepalive) = self.keepalive.lock().take() {
            tasks.push(
                self.spawner
                    .spawn_tracked(keepalive.run(self.cancel_token.clone())),
            );
        }
    }

    /// Initiates graceful shutdown of all services.
    ///
    /// The session is closed first so its `Disconnected` event is still
    /// delivered before the dispatcher stops.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.session.shutdown().await;

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::warn!("[Bootstrap] Background task ended abnormally: {}", e);
            }
        }

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for the player's HTTP API.
fn create_http_client() -> OppoResult<Client> {
    Client::builder().build().map_err(OppoError::Http)
}

/// Picks the address the registration socket binds to.
///
/// The first non-loopback IPv4 address is preferred so replies addressed to
/// this host reach the socket; the wildcard address is the fallback.
fn keepalive_bind_ip(ip_detector: &dyn IpDetector) -> IpAddr {
    match ip_detector.local_addresses() {
        Ok(addrs) => addrs
            .into_iter()
            .find(|ip| ip.is_ipv4() && !ip.is_loopback())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        Err(e) => {
            log::warn!("[Bootstrap] Local address detection failed [{}]: {}", e.code(), e);
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        }
    }
}

/// Bootstraps all services with the system IP detector.
///
/// See [`bootstrap_services_with_detector`].
pub fn bootstrap_services(
    config: &Config,
    emitter: Arc<dyn EventEmitter>,
) -> OppoResult<BootstrappedServices> {
    bootstrap_services_with_detector(config, emitter, LocalIpDetector::arc())
}

/// Bootstraps all services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client, event queue, cancellation token)
/// 2. Session (depends on the event queue)
/// 3. Client (depends on session and HTTP client)
/// 4. Dispatcher (drains the event queue into `emitter`)
/// 5. Keepalive broadcaster (depends on the IP detector)
///
/// Background tasks are not started; call
/// [`BootstrappedServices::start_background_tasks`].
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the HTTP client cannot
/// be built, or the registration socket cannot be bound.
pub fn bootstrap_services_with_detector(
    config: &Config,
    emitter: Arc<dyn EventEmitter>,
    ip_detector: Arc<dyn IpDetector>,
) -> OppoResult<BootstrappedServices> {
    config.validate()?;

    // Create task spawner from current runtime
    let spawner = TokioSpawner::current();

    let http_client = create_http_client()?;
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel_token = CancellationToken::new();

    let session = Session::new(
        config.clone(),
        event_tx,
        spawner.clone(),
        cancel_token.child_token(),
    );

    let client = OppoClient::new(
        Arc::new(session.clone()),
        Arc::new(HttpPlayerApi::new(http_client.clone(), config.http_port)),
        config.command_timeout(),
        config.inter_key_delay(),
    );

    let dispatcher = Arc::new(StatusDispatcher::new(emitter, event_rx, spawner.clone()));

    let bind_ip = keepalive_bind_ip(ip_detector.as_ref());
    let keepalive = KeepaliveBroadcaster::bind(bind_ip, config, ip_detector)?;
    let keepalive_established = keepalive.established_flag();

    Ok(BootstrappedServices {
        session,
        client,
        dispatcher,
        keepalive_established,
        keepalive: Mutex::new(Some(keepalive)),
        tasks: Mutex::new(Vec::new()),
        http_client,
        spawner,
        cancel_token,
    })
}
