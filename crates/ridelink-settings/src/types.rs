//! Settings types.
//!
//! Every struct is `#[serde(default)]` with camelCase keys so a partial
//! settings file only needs the values it changes.

use ridelink_core::ReconnectPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default upstream notification stream endpoint.
pub const DEFAULT_NOTIFICATION_URL: &str = "http://localhost:8005/notification-stream";
/// Default upstream location socket endpoint.
pub const DEFAULT_LOCATION_URL: &str = "ws://localhost:8004/ws/location";

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RidelinkSettings {
    /// Local gateway settings.
    pub server: ServerSettings,
    /// Upstream endpoints and reconnect behaviour.
    pub upstream: UpstreamSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RidelinkSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be non-zero".into(),
            ));
        }
        if server.heartbeat_timeout_secs < server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutSecs ({}) is shorter than the interval ({})",
                server.heartbeat_timeout_secs, server.heartbeat_interval_secs
            )));
        }
        if server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be non-zero".into(),
            ));
        }
        if server.port_channel_capacity == 0 || self.upstream.event_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "channel capacities must be non-zero".into(),
            ));
        }
        check_scheme(
            "upstream.notification.url",
            &self.upstream.notification.url,
            &["http://", "https://"],
        )?;
        check_scheme(
            "upstream.location.url",
            &self.upstream.location.url,
            &["ws://", "wss://"],
        )?;
        Ok(())
    }
}

fn check_scheme(key: &str, url: &str, schemes: &[&str]) -> Result<()> {
    if schemes.iter().any(|s| url.starts_with(s)) {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{key} must start with one of {schemes:?}, got {url:?}"
        )))
    }
}

/// Local gateway settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Maximum concurrent ports.
    pub max_connections: usize,
    /// Seconds between pings to each port.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a port is considered dead.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted frame from a port, in bytes.
    pub max_message_size: usize,
    /// Per-port outbound queue depth.
    pub port_channel_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_connections: 50,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            port_channel_capacity: 64,
        }
    }
}

/// Upstream endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamSettings {
    /// Notification stream (SSE).
    pub notification: ChannelSettings,
    /// Location socket (WebSocket).
    pub location: ChannelSettings,
    /// Multiplexer event queue depth.
    pub event_capacity: usize,
    /// Location socket writer queue depth.
    pub location_outbound_capacity: usize,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            notification: ChannelSettings::with_url(DEFAULT_NOTIFICATION_URL),
            location: ChannelSettings::with_url(DEFAULT_LOCATION_URL),
            event_capacity: 1024,
            location_outbound_capacity: 32,
        }
    }
}

/// One upstream channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelSettings {
    /// Endpoint; the session token is appended as `?token=`.
    pub url: String,
    /// Timeout for the open handshake in ms.
    pub connect_timeout_ms: u64,
    /// Reconnect behaviour.
    pub reconnect: ReconnectPolicy,
}

impl ChannelSettings {
    fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
