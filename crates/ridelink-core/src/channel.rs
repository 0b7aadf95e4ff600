//! Upstream channel kinds and their connection state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two upstream connections the multiplexer owns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Server-push notification stream (SSE).
    Notification,
    /// Bidirectional location socket (WebSocket).
    Location,
}

impl ChannelKind {
    /// Both kinds, in a stable order.
    pub const ALL: [Self; 2] = [Self::Notification, Self::Location];

    /// Stable lowercase name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Location => "location",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one upstream connection.
///
/// Within one activation cycle transitions only move forward:
/// `Idle → Connecting → Open → (Closing → Closed | ReconnectPending → Connecting)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Never started.
    #[default]
    Idle,
    /// An open attempt is in flight.
    Connecting,
    /// Upstream socket is live.
    Open,
    /// Explicit stop in progress.
    Closing,
    /// Stopped or given up.
    Closed,
    /// Waiting for the reconnect timer.
    ReconnectPending,
}

impl ConnectionState {
    /// Whether a start request may open a new upstream from this state.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }

    /// Whether an upstream exists or is about to (socket live, in flight, or scheduled).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::ReconnectPending)
    }

    /// Stable lowercase name used in logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::ReconnectPending => "reconnect_pending",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
