//! One consumer's `WebSocket` connection, as seen by the multiplexer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ridelink_core::PortId;
use ridelink_mux::{DeliveryError, PortSink};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Frames queued for the socket writer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outgoing {
    /// A serialized push.
    Text(Arc<String>),
    /// A liveness probe.
    Ping,
}

/// A connected consumer.
pub struct ClientConnection {
    port_id: Mutex<Option<PortId>>,
    tx: mpsc::Sender<Outgoing>,
    overflowed: CancellationToken,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection feeding `tx`.
    pub fn new(tx: mpsc::Sender<Outgoing>) -> Self {
        let now = Instant::now();
        Self {
            port_id: Mutex::new(None),
            tx,
            overflowed: CancellationToken::new(),
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Record the id the multiplexer assigned.
    pub fn bind_port(&self, port_id: PortId) {
        *self.port_id.lock() = Some(port_id);
    }

    /// The assigned port id, once registered.
    pub fn port_id(&self) -> Option<PortId> {
        *self.port_id.lock()
    }

    /// Queue a ping. Returns `false` if the writer is gone or backed up.
    pub fn ping(&self) -> bool {
        self.tx.try_send(Outgoing::Ping).is_ok()
    }

    /// Total pushes dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and clear the alive flag.
    ///
    /// Returns `true` if the client showed signs of life since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Resolves once a push was refused because the queue was full.
    ///
    /// The multiplexer unregisters the port at that point, so the session
    /// should close the socket.
    pub fn overflowed(&self) -> WaitForCancellationFuture<'_> {
        self.overflowed.cancelled()
    }
}

impl PortSink for ClientConnection {
    fn deliver(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        match self.tx.try_send(Outgoing::Text(message)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                self.overflowed.cancel();
                Err(DeliveryError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }
}
