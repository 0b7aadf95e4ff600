//! Events processed by the multiplexer loop.

use std::sync::Arc;

use ridelink_core::{ChannelKind, PortId};
use tokio::sync::{mpsc, oneshot};

use crate::multiplexer::MuxSnapshot;
use crate::registry::PortSink;

/// One unit of work for the multiplexer loop.
pub enum MuxEvent {
    /// A consumer connected; reply with its id.
    PortConnected {
        /// Where pushes for this port go.
        sink: Arc<dyn PortSink>,
        /// Receives the assigned id.
        reply: oneshot::Sender<PortId>,
    },
    /// A consumer sent a text frame.
    PortMessage {
        /// Sender.
        port_id: PortId,
        /// Raw frame.
        text: String,
    },
    /// A consumer went away.
    PortClosed {
        /// The port to forget.
        port_id: PortId,
    },
    /// Something happened on an upstream I/O task.
    Upstream {
        /// Which upstream.
        channel: ChannelKind,
        /// Activation the event belongs to.
        generation: u64,
        /// What happened.
        event: UpstreamEvent,
    },
    /// A reconnect timer fired.
    ReconnectDue {
        /// Which upstream.
        channel: ChannelKind,
        /// Activation the timer was armed for.
        generation: u64,
    },
    /// Report current state.
    Snapshot {
        /// Receives the snapshot.
        reply: oneshot::Sender<MuxSnapshot>,
    },
}

impl std::fmt::Debug for MuxEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PortConnected { .. } => f.write_str("PortConnected"),
            Self::PortMessage { port_id, text } => f
                .debug_struct("PortMessage")
                .field("port_id", port_id)
                .field("len", &text.len())
                .finish(),
            Self::PortClosed { port_id } => {
                f.debug_struct("PortClosed").field("port_id", port_id).finish()
            }
            Self::Upstream {
                channel,
                generation,
                event,
            } => f
                .debug_struct("Upstream")
                .field("channel", channel)
                .field("generation", generation)
                .field("event", event)
                .finish(),
            Self::ReconnectDue {
                channel,
                generation,
            } => f
                .debug_struct("ReconnectDue")
                .field("channel", channel)
                .field("generation", generation)
                .finish(),
            Self::Snapshot { .. } => f.write_str("Snapshot"),
        }
    }
}

/// Outcome reported by an upstream I/O task.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// The open attempt succeeded.
    Opened {
        /// Writer queue, for channels that accept writes.
        outbound: Option<mpsc::Sender<String>>,
    },
    /// The open attempt failed.
    ConnectFailed {
        /// Transport error text.
        reason: String,
    },
    /// One inbound frame.
    Message {
        /// Raw payload.
        payload: String,
    },
    /// The open upstream went away.
    Closed {
        /// Transport error text, if any.
        reason: Option<String>,
    },
}
