//! The production connector: `reqwest` for the notification stream,
//! `tokio-tungstenite` for the location socket.

use std::time::Duration;

use async_trait::async_trait;
use ridelink_core::ChannelKind;
use tracing::info;

use crate::connector::{UpstreamConnector, UpstreamLink, endpoint_url};
use crate::error::UpstreamError;
use crate::location::open_location_socket;
use crate::notification::open_notification_stream;

/// One upstream endpoint.
#[derive(Clone, Debug)]
pub struct Endpoint {
    /// Base URL; the token is appended as a query parameter.
    pub url: String,
    /// Time allowed for the open handshake.
    pub connect_timeout: Duration,
}

/// Connector configuration.
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    /// Notification stream endpoint.
    pub notification: Endpoint,
    /// Location socket endpoint.
    pub location: Endpoint,
    /// Location writer queue depth.
    pub location_outbound_capacity: usize,
}

/// Opens real network upstreams.
pub struct HttpConnector {
    client: reqwest::Client,
    config: ConnectorConfig,
}

impl HttpConnector {
    /// Build a connector with a shared HTTP client.
    pub fn new(config: ConnectorConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.notification.connect_timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl UpstreamConnector for HttpConnector {
    async fn connect(&self, channel: ChannelKind, token: &str) -> Result<UpstreamLink, UpstreamError> {
        match channel {
            ChannelKind::Notification => {
                let endpoint = &self.config.notification;
                let url = endpoint_url(&endpoint.url, token)?;
                info!(%channel, base = %endpoint.url, "opening upstream");
                open_notification_stream(&self.client, url, endpoint.connect_timeout).await
            }
            ChannelKind::Location => {
                let endpoint = &self.config.location;
                let url = endpoint_url(&endpoint.url, token)?;
                info!(%channel, base = %endpoint.url, "opening upstream");
                open_location_socket(
                    url,
                    endpoint.connect_timeout,
                    self.config.location_outbound_capacity,
                )
                .await
            }
        }
    }
}
