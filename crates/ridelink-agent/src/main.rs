//! # ridelink-agent
//!
//! Daemon binary: loads settings, opens the multiplexer and serves local
//! consumers until a shutdown signal arrives.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use ridelink_mux::{MuxConfig, spawn_multiplexer};
use ridelink_server::shutdown::wait_for_signal;
use ridelink_server::{RidelinkServer, ServerConfig};
use ridelink_settings::RidelinkSettings;
use ridelink_upstream::{ConnectorConfig, Endpoint, HttpConnector};

/// How long in-flight ports and upstreams get to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared connection multiplexer for ride-hailing clients.
#[derive(Parser, Debug)]
#[command(name = "ridelink-agent", about = "Shared connection multiplexer daemon")]
struct Cli {
    /// Settings file (default `~/.ridelink/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Notification stream URL.
    #[arg(long)]
    notification_url: Option<String>,

    /// Location socket URL.
    #[arg(long)]
    location_url: Option<String>,

    /// Log filter directive, e.g. `debug` or `ridelink_mux=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Load settings from the chosen file and layer flags on top.
    fn settings(&self) -> Result<RidelinkSettings> {
        let mut settings = match &self.config {
            Some(path) => ridelink_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => ridelink_settings::load_settings().context("Failed to load settings")?,
        };
        self.apply(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut RidelinkSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.notification_url {
            settings.upstream.notification.url.clone_from(url);
        }
        if let Some(url) = &self.location_url {
            settings.upstream.location.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn server_config(settings: &RidelinkSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_connections: server.max_connections,
        heartbeat_interval_secs: server.heartbeat_interval_secs,
        heartbeat_timeout_secs: server.heartbeat_timeout_secs,
        max_message_size: server.max_message_size,
        port_channel_capacity: server.port_channel_capacity,
    }
}

fn mux_config(settings: &RidelinkSettings) -> MuxConfig {
    MuxConfig {
        notification_reconnect: settings.upstream.notification.reconnect.clone(),
        location_reconnect: settings.upstream.location.reconnect.clone(),
        event_capacity: settings.upstream.event_capacity,
    }
}

fn connector_config(settings: &RidelinkSettings) -> ConnectorConfig {
    let upstream = &settings.upstream;
    ConnectorConfig {
        notification: Endpoint {
            url: upstream.notification.url.clone(),
            connect_timeout: Duration::from_millis(upstream.notification.connect_timeout_ms),
        },
        location: Endpoint {
            url: upstream.location.url.clone(),
            connect_timeout: Duration::from_millis(upstream.location.connect_timeout_ms),
        },
        location_outbound_capacity: upstream.location_outbound_capacity,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    ridelink_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let metrics_handle = ridelink_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let connector = HttpConnector::new(connector_config(&settings))
        .context("Failed to build upstream connector")?;
    let (mux, mux_task) = spawn_multiplexer(Arc::new(connector), &mux_config(&settings));

    let server = RidelinkServer::new(server_config(&settings), mux.clone(), Some(metrics_handle));
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!(
        notification = %settings.upstream.notification.url,
        location = %settings.upstream.location.url,
        "ridelink listening on ws://{addr}/ws"
    );

    wait_for_signal().await;

    tracing::info!("Shutting down...");
    mux.shutdown();
    server
        .shutdown()
        .graceful_shutdown(vec![handle, mux_task], Some(SHUTDOWN_GRACE))
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
