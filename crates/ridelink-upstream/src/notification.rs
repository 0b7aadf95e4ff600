//! Notification stream transport (SSE over `reqwest`).

use std::time::Duration;

use reqwest::Url;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::{debug, instrument};

use crate::connector::UpstreamLink;
use crate::error::UpstreamError;
use crate::sse::parse_sse_events;

/// Open the notification stream at `url`.
///
/// Resolves once response headers with a success status have arrived.
#[instrument(skip_all, fields(host = url.host_str().unwrap_or_default()))]
pub async fn open_notification_stream(
    client: &reqwest::Client,
    url: Url,
    connect_timeout: Duration,
) -> Result<UpstreamLink, UpstreamError> {
    let request = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send();

    let response = tokio::time::timeout(connect_timeout, request)
        .await
        .map_err(|_| UpstreamError::Timeout(connect_timeout))??;

    let status = response.status();
    if !status.is_success() {
        return Err(UpstreamError::Status {
            status: status.as_u16(),
        });
    }
    debug!(%status, "notification stream open");

    Ok(UpstreamLink {
        inbound: Box::pin(parse_sse_events(response.bytes_stream())),
        outbound: None,
    })
}
