//! The multiplexer event loop and the handle used to reach it.

use std::sync::Arc;
use std::time::Instant;

use metrics::gauge;
use ridelink_core::{ChannelKind, Identity, MuxError, OutboundMessage, PortId, ReconnectPolicy};
use ridelink_upstream::UpstreamConnector;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::control;
use crate::event::MuxEvent;
use crate::metrics::PORTS_ACTIVE;
use crate::registry::{PortRegistry, PortSink};
use crate::relay::LocationRelay;
use crate::supervisor::{ChannelSnapshot, ConnectionSupervisor};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Multiplexer configuration.
#[derive(Clone, Debug)]
pub struct MuxConfig {
    /// Reconnect behaviour of the notification stream.
    pub notification_reconnect: ReconnectPolicy,
    /// Reconnect behaviour of the location socket.
    pub location_reconnect: ReconnectPolicy,
    /// Event queue depth.
    pub event_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            notification_reconnect: ReconnectPolicy::default(),
            location_reconnect: ReconnectPolicy::default(),
            event_capacity: 1024,
        }
    }
}

/// Point-in-time view of the whole multiplexer.
#[derive(Clone, Debug, Serialize)]
pub struct MuxSnapshot {
    /// Registered ports.
    pub ports: usize,
    /// Whether a session token is set.
    pub authenticated: bool,
    /// Identity read from the token.
    pub identity: Option<Identity>,
    /// Notification stream.
    pub notification: ChannelSnapshot,
    /// Location socket.
    pub location: ChannelSnapshot,
    /// Location updates forwarded so far.
    pub location_updates_forwarded: u64,
    /// Location updates dropped so far.
    pub location_updates_dropped: u64,
    /// Seconds since the loop started.
    pub uptime_secs: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Multiplexer
// ─────────────────────────────────────────────────────────────────────────────

/// All multiplexer state, owned by one task.
pub struct Multiplexer {
    registry: PortRegistry,
    broadcaster: Broadcaster,
    supervisor: ConnectionSupervisor,
    relay: LocationRelay,
    started_at: Instant,
}

impl Multiplexer {
    /// Build the state. `events` is the sender half of the loop's queue;
    /// upstream tasks and timers post through it.
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        config: &MuxConfig,
        events: mpsc::Sender<MuxEvent>,
    ) -> Self {
        Self {
            registry: PortRegistry::new(),
            broadcaster: Broadcaster,
            supervisor: ConnectionSupervisor::new(
                connector,
                events,
                config.notification_reconnect.clone(),
                config.location_reconnect.clone(),
            ),
            relay: LocationRelay::new(),
            started_at: Instant::now(),
        }
    }

    /// Process events until `shutdown` fires or every sender is gone, then
    /// stop both upstreams and drop every port.
    pub async fn run(mut self, mut events: mpsc::Receiver<MuxEvent>, shutdown: CancellationToken) {
        info!("multiplexer started");
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        self.supervisor.stop_all();
        self.registry.clear();
        gauge!(PORTS_ACTIVE).set(0.0);
        info!("multiplexer stopped");
    }

    /// Apply one event. Never waits on I/O.
    pub fn handle(&mut self, event: MuxEvent) {
        match event {
            MuxEvent::PortConnected { sink, reply } => {
                let port_id = self.connect_port(sink);
                if reply.send(port_id).is_err() {
                    debug!(%port_id, "port vanished before registration completed");
                    self.disconnect_port(port_id);
                }
            }
            MuxEvent::PortMessage { port_id, text } => {
                if !self.registry.contains(port_id) {
                    debug!(%port_id, "message from unregistered port ignored");
                    return;
                }
                let _ = control::handle_frame(port_id, &text, &mut self.supervisor, &mut self.relay);
            }
            MuxEvent::PortClosed { port_id } => self.disconnect_port(port_id),
            MuxEvent::Upstream {
                channel,
                generation,
                event,
            } => {
                if let Some(message) = self.supervisor.on_upstream(channel, generation, event) {
                    let _ = self.broadcaster.broadcast(&mut self.registry, &message);
                }
            }
            MuxEvent::ReconnectDue {
                channel,
                generation,
            } => self.supervisor.on_reconnect_due(channel, generation),
            MuxEvent::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Point-in-time view.
    pub fn snapshot(&self) -> MuxSnapshot {
        let session = self.supervisor.session();
        MuxSnapshot {
            ports: self.registry.len(),
            authenticated: session.is_authenticated(),
            identity: session.identity().cloned(),
            notification: self.supervisor.snapshot(ChannelKind::Notification),
            location: self.supervisor.snapshot(ChannelKind::Location),
            location_updates_forwarded: self.relay.forwarded(),
            location_updates_dropped: self.relay.dropped(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    fn connect_port(&mut self, sink: Arc<dyn PortSink>) -> PortId {
        let known = self.registry.len();
        let port_id = self.registry.register(sink);
        if self.registry.len() > known {
            let greeting = OutboundMessage::Connected { port_id };
            if let Err(e) = self.broadcaster.send_to(&mut self.registry, port_id, &greeting) {
                warn!(%port_id, error = %e, "greeting failed");
            }
            info!(%port_id, ports = self.registry.len(), "port connected");
        }
        self.update_port_gauge();
        port_id
    }

    fn disconnect_port(&mut self, port_id: PortId) {
        if self.registry.unregister(port_id).is_some() {
            info!(%port_id, ports = self.registry.len(), "port disconnected");
        }
        self.update_port_gauge();
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_port_gauge(&self) {
        gauge!(PORTS_ACTIVE).set(self.registry.len() as f64);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Cloneable entry point into a running multiplexer.
#[derive(Clone)]
pub struct MuxHandle {
    events: mpsc::Sender<MuxEvent>,
    shutdown: CancellationToken,
}

impl MuxHandle {
    /// Register a port and wait for its id.
    pub async fn connect_port(&self, sink: Arc<dyn PortSink>) -> Result<PortId, MuxError> {
        let (reply, rx) = oneshot::channel();
        self.send(MuxEvent::PortConnected { sink, reply }).await?;
        rx.await.map_err(|_| MuxError::Stopped)
    }

    /// Hand a text frame from `port_id` to the loop.
    pub async fn submit(&self, port_id: PortId, text: String) -> Result<(), MuxError> {
        self.send(MuxEvent::PortMessage { port_id, text }).await
    }

    /// Unregister a port.
    pub async fn disconnect(&self, port_id: PortId) -> Result<(), MuxError> {
        self.send(MuxEvent::PortClosed { port_id }).await
    }

    /// Current state of the multiplexer.
    pub async fn snapshot(&self) -> Result<MuxSnapshot, MuxError> {
        let (reply, rx) = oneshot::channel();
        self.send(MuxEvent::Snapshot { reply }).await?;
        rx.await.map_err(|_| MuxError::Stopped)
    }

    /// Ask the loop to stop both upstreams and exit.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn send(&self, event: MuxEvent) -> Result<(), MuxError> {
        if self.shutdown.is_cancelled() {
            return Err(MuxError::Stopped);
        }
        self.events.send(event).await.map_err(|_| MuxError::Stopped)
    }
}

/// Spawn the multiplexer loop and return its handle.
pub fn spawn_multiplexer(
    connector: Arc<dyn UpstreamConnector>,
    config: &MuxConfig,
) -> (MuxHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
    let shutdown = CancellationToken::new();
    let mux = Multiplexer::new(connector, config, tx.clone());
    let task = tokio::spawn(mux.run(rx, shutdown.clone()));
    (
        MuxHandle {
            events: tx,
            shutdown,
        },
        task,
    )
}

#[cfg(test)]
mod tests {
    use ridelink_core::ConnectionState;

    use super::*;
    use crate::testutil::{ScriptedConnector, settle};

    fn mux() -> (Multiplexer, mpsc::Receiver<MuxEvent>, Arc<ScriptedConnector>) {
        let connector = Arc::new(ScriptedConnector::new());
        let (tx, rx) = mpsc::channel(64);
        let mux = Multiplexer::new(connector.clone(), &MuxConfig::default(), tx);
        (mux, rx, connector)
    }

    fn connect(mux: &mut Multiplexer) -> (PortId, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(16);
        let (reply, mut id_rx) = oneshot::channel();
        mux.handle(MuxEvent::PortConnected {
            sink: Arc::new(tx),
            reply,
        });
        (id_rx.try_recv().unwrap(), rx)
    }

    async fn drain(mux: &mut Multiplexer, rx: &mut mpsc::Receiver<MuxEvent>) {
        loop {
            settle().await;
            let mut handled = false;
            while let Ok(event) = rx.try_recv() {
                handled = true;
                mux.handle(event);
            }
            if !handled {
                return;
            }
        }
    }

    #[tokio::test]
    async fn new_port_is_greeted_with_its_id() {
        let (mut mux, _rx, _c) = mux();
        let (id, mut port) = connect(&mut mux);
        let greeting: OutboundMessage = serde_json::from_str(&port.try_recv().unwrap()).unwrap();
        assert_eq!(greeting, OutboundMessage::Connected { port_id: id });
        assert_eq!(mux.snapshot().ports, 1);
    }

    #[tokio::test]
    async fn closed_port_is_forgotten() {
        let (mut mux, _rx, _c) = mux();
        let (id, _port) = connect(&mut mux);
        mux.handle(MuxEvent::PortClosed { port_id: id });
        assert_eq!(mux.snapshot().ports, 0);
        // unknown id is fine
        mux.handle(MuxEvent::PortClosed { port_id: id });
    }

    #[tokio::test]
    async fn messages_from_unknown_ports_are_ignored() {
        let (mut mux, mut rx, connector) = mux();
        mux.handle(MuxEvent::PortMessage {
            port_id: PortId::new(42),
            text: r#"{"action":"setToken","token":"T1"}"#.into(),
        });
        drain(&mut mux, &mut rx).await;
        assert!(!mux.snapshot().authenticated);
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test]
    async fn notification_fans_out_to_ports() {
        let (mut mux, mut rx, connector) = mux();
        let (a, mut pa) = connect(&mut mux);
        let (_b, mut pb) = connect(&mut mux);
        let _ = pa.try_recv();
        let _ = pb.try_recv();

        mux.handle(MuxEvent::PortMessage {
            port_id: a,
            text: r#"{"action":"setToken","token":"T1"}"#.into(),
        });
        drain(&mut mux, &mut rx).await;
        assert_eq!(mux.snapshot().notification.state, ConnectionState::Open);

        assert!(connector.upstream(ChannelKind::Notification).unwrap().push("hello"));
        drain(&mut mux, &mut rx).await;

        let expected = r#"{"type":"notification","data":"hello"}"#;
        assert_eq!(pa.try_recv().unwrap().as_str(), expected);
        assert_eq!(pb.try_recv().unwrap().as_str(), expected);
    }

    #[tokio::test]
    async fn snapshot_reports_identity() {
        use base64::Engine as _;
        let (mut mux, mut rx, _c) = mux();
        let (a, _pa) = connect(&mut mux);
        let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(r#"{"user_id":9,"user":"rider"}"#);
        mux.handle(MuxEvent::PortMessage {
            port_id: a,
            text: format!(r#"{{"action":"setToken","token":"h.{payload}.s"}}"#),
        });
        drain(&mut mux, &mut rx).await;
        let snap = mux.snapshot();
        assert!(snap.authenticated);
        assert_eq!(snap.identity.unwrap().user_id.as_deref(), Some("9"));
    }

    #[tokio::test]
    async fn handle_reports_stopped_after_shutdown() {
        let connector = Arc::new(ScriptedConnector::new());
        let (handle, task) = spawn_multiplexer(connector, &MuxConfig::default());
        assert_eq!(handle.snapshot().await.unwrap().ports, 0);
        handle.shutdown();
        task.await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap_err(), MuxError::Stopped);
    }
}
