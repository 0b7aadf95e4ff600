//! `/health` endpoint body.

use std::time::Instant;

use ridelink_core::ConnectionState;
use ridelink_mux::{ChannelSnapshot, MuxSnapshot};
use serde::Serialize;

/// Health of one upstream channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelHealth {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Consecutive failed attempts.
    pub retry_count: u32,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
}

impl From<&ChannelSnapshot> for ChannelHealth {
    fn from(snapshot: &ChannelSnapshot) -> Self {
        Self {
            state: snapshot.state,
            retry_count: snapshot.retry_count,
            last_error: snapshot.last_error.clone(),
        }
    }
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while the multiplexer runs, `"stopping"` after shutdown began.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current port connection count.
    pub connections: usize,
    /// Whether a session token is held.
    pub authenticated: bool,
    /// Notification stream state.
    pub notification: Option<ChannelHealth>,
    /// Location socket state.
    pub location: Option<ChannelHealth>,
}

/// Build a health response from a multiplexer snapshot.
///
/// `None` means the multiplexer no longer answers.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    snapshot: Option<&MuxSnapshot>,
) -> HealthResponse {
    HealthResponse {
        status: if snapshot.is_some() { "ok" } else { "stopping" }.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        authenticated: snapshot.is_some_and(|s| s.authenticated),
        notification: snapshot.map(|s| ChannelHealth::from(&s.notification)),
        location: snapshot.map(|s| ChannelHealth::from(&s.location)),
    }
}
