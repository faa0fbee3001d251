//! Oppo Server - headless bridge for Oppo network disc players.
//!
//! This binary finds a player, keeps its control session open, reconnects
//! after drops, fires status hooks, and can press a key sequence on start-up.
//! It's designed to run as a background daemon next to the player.

mod config;
mod hooks;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use oppo_core::{
    bootstrap_services, ChannelEventBridge, ConnectionEvent, DeviceAnnouncement, DeviceEvent,
    DisconnectReason, ErrorCode, LoggingEventEmitter, OppoClient, OppoError, RemoteKey, Session,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::hooks::StatusHooks;

/// Oppo Server - Headless control bridge for Oppo network disc players.
#[derive(Parser, Debug)]
#[command(name = "oppo-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "OPPO_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Player address as `ip` or `ip:port`; skips discovery (overrides config file).
    #[arg(short = 'd', long, value_name = "ADDR")]
    device: Option<String>,

    /// Remote key to press after the first connect. Repeat for a sequence.
    #[arg(long = "press", value_name = "KEY")]
    press: Vec<RemoteKey>,
}

/// How the server reaches the player.
#[derive(Debug, Clone, Copy)]
enum ConnectTarget {
    Discover,
    Direct(SocketAddr),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Oppo Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(device) = args.device {
        config.device_address = Some(device);
    }

    let target = match config.device_endpoint()? {
        Some(addr) => {
            log::info!("Configuration: device={}", addr);
            ConnectTarget::Direct(addr)
        }
        None => {
            log::info!(
                "Configuration: device=discover (UDP port {})",
                config.core.discovery_port
            );
            ConnectTarget::Discover
        }
    };
    let reconnect_delay = Duration::from_secs(config.reconnect_delay_secs);

    // Events reach this task through the bridge; the logging emitter mirrors them.
    let (bridge, mut events) = ChannelEventBridge::new();
    bridge.set_external_emitter(Arc::new(LoggingEventEmitter));

    let services = bootstrap_services(&config.core, Arc::new(bridge))
        .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    services.start_background_tasks();

    log::info!("Background tasks started");

    let hooks = StatusHooks::new(services.http_client().clone(), config.status_hooks);
    let mut pending_keys = Some(args.press).filter(|keys| !keys.is_empty());
    let cancel = services.cancel_token.child_token();

    tokio::spawn(connect_until_ready(
        services.session.clone(),
        target,
        Duration::ZERO,
        reconnect_delay,
        cancel.clone(),
    ));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Some(DeviceEvent::Connection(ConnectionEvent::Connected { device, .. })) => {
                    log::info!("Connected to {} at {}", device.name, device.socket_addr());
                    if let Some(keys) = pending_keys.take() {
                        tokio::spawn(press_sequence(services.client.clone(), keys));
                    }
                }
                Some(DeviceEvent::Connection(ConnectionEvent::Disconnected { reason, .. })) => {
                    if reason == DisconnectReason::Shutdown {
                        continue;
                    }
                    log::warn!(
                        "Connection lost ({}), reconnecting in {:?}",
                        reason,
                        reconnect_delay
                    );
                    tokio::spawn(connect_until_ready(
                        services.session.clone(),
                        target,
                        reconnect_delay,
                        reconnect_delay,
                        cancel.clone(),
                    ));
                }
                Some(DeviceEvent::Status(status)) => {
                    hooks.fire(&status);
                }
                None => break,
            },
        }
    }

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown
    cancel.cancel();
    services.shutdown().await;

    log::info!("Shutdown complete");
    Ok(())
}

/// Connects to the player, retrying every `retry_delay` until it succeeds.
///
/// Gives up on shutdown or if another task already opened the session.
async fn connect_until_ready(
    session: Session,
    target: ConnectTarget,
    initial_delay: Duration,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    let mut delay = initial_delay;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = retry_delay;

        let attempt = match target {
            ConnectTarget::Discover => session.connect().await,
            ConnectTarget::Direct(addr) => {
                session
                    .connect_to(DeviceAnnouncement::direct("configured", addr))
                    .await
            }
        };
        match attempt {
            Ok(_) => return,
            Err(OppoError::ShuttingDown | OppoError::AlreadyConnected) => return,
            Err(e) => log::warn!(
                "Connect failed [{}]: {}; retrying in {:?}",
                e.code(),
                e,
                retry_delay
            ),
        }
    }
}

/// Presses the start-up key sequence once.
async fn press_sequence(client: OppoClient, keys: Vec<RemoteKey>) {
    let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
    log::info!("Pressing {}", names.join(", "));
    match client.press_keys(&keys).await {
        Ok(()) => log::info!("Key sequence complete"),
        Err(e) => log::error!("Key sequence failed [{}]: {}", e.code(), e),
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_device_address;

    #[test]
    fn press_flags_parse_key_names() {
        let args = Args::try_parse_from([
            "oppo-server",
            "--press",
            "Home",
            "--press",
            "downarrow",
            "--press",
            "Enter",
        ])
        .unwrap();
        assert_eq!(
            args.press,
            vec![RemoteKey::Home, RemoteKey::DownArrow, RemoteKey::Enter]
        );
        assert!(args.device.is_none());
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(Args::try_parse_from(["oppo-server", "--press", "Rewind"]).is_err());
    }

    #[test]
    fn device_flag_accepts_bare_ip() {
        let args = Args::try_parse_from(["oppo-server", "-d", "192.168.1.40"]).unwrap();
        assert_eq!(
            parse_device_address(args.device.as_deref().unwrap()).unwrap(),
            "192.168.1.40:23".parse().unwrap()
        );
    }
}
