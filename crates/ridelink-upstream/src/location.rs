//! Location socket transport (WebSocket over `tokio-tungstenite`).
//!
//! The socket is split: the read half becomes the link's inbound stream and
//! the write half is owned by a writer task fed from the link's outbound
//! queue. Dropping every outbound sender makes the writer send a close frame
//! and exit.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, instrument, warn};

use crate::connector::{InboundStream, UpstreamLink};
use crate::error::UpstreamError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsReader = futures::stream::SplitStream<WsStream>;
type WsWriter = futures::stream::SplitSink<WsStream, Message>;

/// Open the location socket at `url`.
///
/// `outbound_capacity` bounds the writer queue; the multiplexer never waits
/// on it and drops frames when it is full.
#[instrument(skip_all, fields(host = url.host_str().unwrap_or_default()))]
pub async fn open_location_socket(
    url: Url,
    connect_timeout: Duration,
    outbound_capacity: usize,
) -> Result<UpstreamLink, UpstreamError> {
    let (ws, response) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| UpstreamError::Timeout(connect_timeout))??;
    debug!(status = %response.status(), "location socket open");

    let (writer, reader) = ws.split();
    let (tx, rx) = mpsc::channel(outbound_capacity.max(1));
    let _ = tokio::spawn(run_writer(writer, rx));

    Ok(UpstreamLink {
        inbound: inbound_frames(reader),
        outbound: Some(tx),
    })
}

async fn run_writer(mut writer: WsWriter, mut rx: mpsc::Receiver<String>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.send(Message::Text(frame.into())).await {
            warn!(error = %e, "location socket write failed");
            return;
        }
    }
    debug!("location writer released, closing socket");
    let _ = writer.send(Message::Close(None)).await;
    let _ = writer.close().await;
}

fn inbound_frames(reader: WsReader) -> InboundStream {
    Box::pin(futures::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some((Ok(text.to_string()), Some(reader)));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some((Ok(text), Some(reader))),
                    Err(_) => debug!(len = bytes.len(), "skipping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "close frame".to_string());
                    return Some((Err(UpstreamError::Closed(reason)), None));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Some((Err(e.into()), None)),
                None => return None,
            }
        }
    }))
}
