//! Error taxonomy for the multiplexer.
//!
//! None of these errors crosses the control-protocol boundary: consumers
//! never receive an error reply. They are logged, recorded as an upstream's
//! `last_error`, and surfaced through `/health`.

use thiserror::Error;

use crate::channel::ChannelKind;
use crate::ids::PortId;

/// Convenience alias.
pub type Result<T, E = MuxError> = std::result::Result<T, E>;

/// Errors raised inside the multiplexer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MuxError {
    /// A start was requested before any `setToken`.
    #[error("cannot start {channel} upstream: no session token")]
    AuthMissing {
        /// Channel that was asked to start.
        channel: ChannelKind,
    },

    /// An open attempt failed.
    #[error("{channel} upstream connect failed: {reason}")]
    UpstreamConnect {
        /// Channel that failed to open.
        channel: ChannelKind,
        /// Transport error text.
        reason: String,
    },

    /// An open upstream went away without a stop request.
    #[error("{channel} upstream closed unexpectedly{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    UpstreamClosedUnexpectedly {
        /// Channel that closed.
        channel: ChannelKind,
        /// Transport error text, if the close carried one.
        reason: Option<String>,
    },

    /// A consumer sent something that is not a recognized control request.
    #[error("malformed client message: {reason}")]
    MalformedClientMessage {
        /// What was wrong with it.
        reason: String,
    },

    /// Delivery to a port failed because it is gone.
    #[error("{port_id} is gone")]
    PortGone {
        /// The port that could not be reached.
        port_id: PortId,
    },

    /// The multiplexer event loop is no longer running.
    #[error("multiplexer stopped")]
    Stopped,
}

impl MuxError {
    /// Shorthand for a [`MuxError::MalformedClientMessage`].
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedClientMessage {
            reason: reason.into(),
        }
    }
}
