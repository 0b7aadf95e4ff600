//! Metric names emitted by the multiplexer.

/// Messages dropped for a port whose queue was full (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "ridelink_broadcast_drops_total";
/// Ports pruned by the broadcaster (counter, label `reason`).
pub const PORTS_PRUNED_TOTAL: &str = "ridelink_ports_pruned_total";
/// Messages broadcast to ports (counter, label `type`).
pub const BROADCASTS_TOTAL: &str = "ridelink_broadcasts_total";
/// Location updates handled (counter, label `outcome`).
pub const LOCATION_UPDATES_TOTAL: &str = "ridelink_location_updates_total";
/// Upstream open attempts (counter, label `channel`).
pub const UPSTREAM_CONNECT_ATTEMPTS_TOTAL: &str = "ridelink_upstream_connect_attempts_total";
/// Scheduled upstream reconnects (counter, label `channel`).
pub const UPSTREAM_RECONNECTS_TOTAL: &str = "ridelink_upstream_reconnects_total";
/// Registered ports (gauge).
pub const PORTS_ACTIVE: &str = "ridelink_ports_active";
/// Malformed consumer requests (counter).
pub const MALFORMED_REQUESTS_TOTAL: &str = "ridelink_malformed_requests_total";
