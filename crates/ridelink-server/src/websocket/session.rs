//! Per-port driver: runs one upgraded connection from registration to disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use ridelink_mux::MuxHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Outgoing};
use super::handler::{Inbound, classify};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::config::ServerConfig;
use crate::metrics::{
    HEARTBEAT_TIMEOUTS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// How long the writer may keep flushing after the read side is done.
const WRITER_GRACE: Duration = Duration::from_secs(2);

/// Serve one consumer connection.
///
/// 1. Registers the connection as a port (the multiplexer greets it)
/// 2. Forwards queued pushes and pings to the socket
/// 3. Submits inbound text frames to the multiplexer
/// 4. Closes the port on client close, heartbeat timeout, a full queue or
///    shutdown
#[instrument(skip_all, fields(port_id = tracing::field::Empty))]
pub async fn run_port_session(
    ws: WebSocket,
    mux: MuxHandle,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Outgoing>(config.port_channel_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(send_tx));

    let port_id = match mux.connect_port(connection.clone()).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "multiplexer unavailable, refusing connection");
            let _ = ws_tx.close().await;
            return;
        }
    };
    connection.bind_port(port_id);
    let _ = tracing::Span::current().record("port_id", port_id.get());

    let started = Instant::now();
    info!("port connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = send_rx.recv().await {
            let message = match frame {
                Outgoing::Text(text) => Message::Text(String::clone(&text).into()),
                Outgoing::Ping => Message::Ping(Bytes::new()),
            };
            if ws_tx.send(message).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let heartbeat = run_heartbeat(
        connection.clone(),
        config.heartbeat_interval(),
        config.heartbeat_timeout(),
        shutdown.child_token(),
    );
    tokio::pin!(heartbeat);

    let reason = loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read failed");
                        break "read error";
                    }
                    None => break "stream ended",
                };
                match classify(frame) {
                    Inbound::Submit(text) => {
                        connection.mark_alive();
                        if mux.submit(port_id, text).await.is_err() {
                            break "multiplexer stopped";
                        }
                    }
                    Inbound::Alive => connection.mark_alive(),
                    Inbound::Close => break "client closed",
                    Inbound::Ignore => {}
                }
            }
            () = connection.overflowed() => {
                warn!("port fell behind, closing");
                break "queue full";
            }
            result = &mut heartbeat => {
                if result == HeartbeatResult::TimedOut {
                    counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
                    warn!(
                        silent_secs = connection.last_pong_elapsed().as_secs(),
                        "port unresponsive, closing"
                    );
                    break "heartbeat timeout";
                }
                break "server shutting down";
            }
        }
    };

    let _ = mux.disconnect(port_id).await;
    let dropped = connection.drop_count();
    drop(connection);
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }

    info!(reason, dropped, "port disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}
