//! Prometheus recorder, `/metrics` rendering, and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

pub use ridelink_mux::metrics::{
    BROADCAST_DROPS_TOTAL, BROADCASTS_TOTAL, LOCATION_UPDATES_TOTAL, MALFORMED_REQUESTS_TOTAL,
    PORTS_ACTIVE, PORTS_PRUNED_TOTAL, UPSTREAM_CONNECT_ATTEMPTS_TOTAL, UPSTREAM_RECONNECTS_TOTAL,
};

/// Install the Prometheus metrics recorder (global).
///
/// Call once at startup, before anything records.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Port connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ridelink_ws_connections_total";
/// Port connections closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ridelink_ws_disconnections_total";
/// Open port connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ridelink_ws_connections_active";
/// Upgrades refused at the connection cap (counter).
pub const WS_REJECTED_TOTAL: &str = "ridelink_ws_rejected_total";
/// Port connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ridelink_ws_connection_duration_seconds";
/// Ports closed for missing pongs (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "ridelink_heartbeat_timeouts_total";
