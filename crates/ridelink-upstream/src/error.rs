//! Transport errors.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors raised while opening or reading an upstream.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The configured endpoint could not be turned into a URL.
    #[error("invalid endpoint {url:?}: {reason}")]
    InvalidEndpoint {
        /// Configured endpoint.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The notification service answered with a non-success status.
    #[error("unexpected HTTP status {status}")]
    Status {
        /// Response status code.
        status: u16,
    },

    /// WebSocket handshake or transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    /// The open handshake did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// The byte stream failed mid-flight.
    #[error("stream error: {0}")]
    Stream(String),

    /// The peer sent a close frame.
    #[error("closed by peer: {0}")]
    Closed(String),
}

impl From<tungstenite::Error> for UpstreamError {
    fn from(err: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
