//! The seam between the multiplexer and its transports.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Url;
use ridelink_core::ChannelKind;
use tokio::sync::mpsc;

use crate::error::UpstreamError;

/// Frames arriving from an upstream, in transport order.
///
/// The stream ends when the upstream goes away. An `Err` item is the last
/// item the stream yields.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

/// An open upstream.
pub struct UpstreamLink {
    /// Incoming frames.
    pub inbound: InboundStream,
    /// Queue feeding the upstream writer, for channels that accept writes.
    ///
    /// Dropping every sender closes the upstream socket.
    pub outbound: Option<mpsc::Sender<String>>,
}

impl std::fmt::Debug for UpstreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamLink")
            .field("writable", &self.outbound.is_some())
            .finish_non_exhaustive()
    }
}

/// Opens upstream connections on behalf of the multiplexer.
#[async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    /// Open `channel` authenticated with `token`.
    ///
    /// Resolves once the upstream is usable (SSE response headers received,
    /// WebSocket handshake complete).
    async fn connect(&self, channel: ChannelKind, token: &str) -> Result<UpstreamLink, UpstreamError>;
}

/// Append `?token=<token>` to an endpoint, keeping any existing query.
pub fn endpoint_url(base: &str, token: &str) -> Result<Url, UpstreamError> {
    let mut url = Url::parse(base).map_err(|e| UpstreamError::InvalidEndpoint {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    let _ = url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}
