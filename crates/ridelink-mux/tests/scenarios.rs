//! End-to-end multiplexer behaviour through `MuxHandle`, with scripted upstreams.

use std::sync::Arc;
use std::time::Duration;

use ridelink_core::{ChannelKind, ConnectionState, OutboundMessage, PortId};
use ridelink_mux::testutil::{ScriptedConnector, settle};
use ridelink_mux::{MuxConfig, MuxHandle, MuxSnapshot, spawn_multiplexer};
use serde_json::{Value, json};
use tokio::sync::mpsc;

struct TestPort {
    id: PortId,
    rx: mpsc::Receiver<Arc<String>>,
}

impl TestPort {
    async fn open(handle: &MuxHandle) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let id = handle.connect_port(Arc::new(tx)).await.unwrap();
        let mut port = Self { id, rx };
        assert_eq!(port.pushes(), vec![OutboundMessage::Connected { port_id: id }]);
        port
    }

    async fn send(&self, handle: &MuxHandle, request: Value) {
        handle.submit(self.id, request.to_string()).await.unwrap();
    }

    fn pushes(&mut self) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Ok(json) = self.rx.try_recv() {
            out.push(serde_json::from_str(&json).unwrap());
        }
        out
    }
}

fn boot() -> (MuxHandle, Arc<ScriptedConnector>) {
    let connector = Arc::new(ScriptedConnector::new());
    let (handle, _task) = spawn_multiplexer(connector.clone(), &MuxConfig::default());
    (handle, connector)
}

/// Run spawned tasks and the loop until queued work is done.
async fn quiesce(handle: &MuxHandle) -> MuxSnapshot {
    for _ in 0..4 {
        settle().await;
        let _ = handle.snapshot().await.unwrap();
    }
    handle.snapshot().await.unwrap()
}

fn notification(data: &str) -> OutboundMessage {
    OutboundMessage::Notification { data: data.into() }
}

// ── Consumer flows ──────────────────────────────────────────────────────────

#[tokio::test]
async fn three_ports_all_receive_notification_after_one_sets_token() {
    let (handle, connector) = boot();
    let mut ports = Vec::new();
    for _ in 0..3 {
        ports.push(TestPort::open(&handle).await);
    }

    ports[0]
        .send(&handle, json!({"action": "setToken", "token": "T1"}))
        .await;
    let snap = quiesce(&handle).await;
    assert_eq!(snap.notification.state, ConnectionState::Open);
    assert_eq!(connector.attempts()[0].token, "T1");

    let event = r#"{"message":"Driver assigned","status":"accepted","params":{}}"#;
    assert!(connector.upstream(ChannelKind::Notification).unwrap().push(event));
    let _ = quiesce(&handle).await;

    for port in &mut ports {
        assert_eq!(port.pushes(), vec![notification(event)]);
    }
}

#[tokio::test]
async fn start_without_token_opens_nothing() {
    let (handle, connector) = boot();
    let port = TestPort::open(&handle).await;

    port.send(&handle, json!({"action": "start"})).await;
    let snap = quiesce(&handle).await;

    assert_eq!(connector.attempt_count(ChannelKind::Location), 0);
    assert_eq!(snap.location.state, ConnectionState::Idle);
    assert!(snap.location.last_error.unwrap().contains("no session token"));
}

#[tokio::test(start_paused = true)]
async fn lost_location_socket_reconnects_after_delay_with_stored_token() {
    let (handle, connector) = boot();
    let port = TestPort::open(&handle).await;
    port.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    port.send(&handle, json!({"action": "startWebSocket"})).await;
    assert_eq!(quiesce(&handle).await.location.state, ConnectionState::Open);

    connector.upstream(ChannelKind::Location).unwrap().fail("reset by peer");
    let snap = quiesce(&handle).await;
    assert_eq!(snap.location.state, ConnectionState::ReconnectPending);
    assert!(snap.location.last_error.unwrap().contains("reset by peer"));

    tokio::time::advance(Duration::from_secs(5)).await;
    let snap = quiesce(&handle).await;

    let attempts: Vec<_> = connector
        .attempts()
        .into_iter()
        .filter(|a| a.channel == ChannelKind::Location)
        .collect();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].token, "T1");
    assert_eq!(snap.location.state, ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn lost_notification_stream_reconnects_after_delay_with_stored_token() {
    let (handle, connector) = boot();
    let mut port = TestPort::open(&handle).await;
    port.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    assert_eq!(quiesce(&handle).await.notification.state, ConnectionState::Open);

    connector.upstream(ChannelKind::Notification).unwrap().close();
    let snap = quiesce(&handle).await;
    assert_eq!(snap.notification.state, ConnectionState::ReconnectPending);
    assert_eq!(connector.attempt_count(ChannelKind::Notification), 1);

    tokio::time::advance(Duration::from_secs(5)).await;
    let snap = quiesce(&handle).await;
    assert_eq!(snap.notification.state, ConnectionState::Open);

    let attempts: Vec<_> = connector
        .attempts()
        .into_iter()
        .filter(|a| a.channel == ChannelKind::Notification)
        .collect();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].token, "T1");

    // the fresh stream fans out like the first one
    assert!(connector.upstream(ChannelKind::Notification).unwrap().push("again"));
    let _ = quiesce(&handle).await;
    assert_eq!(port.pushes(), vec![notification("again")]);
}

#[tokio::test]
async fn update_while_connecting_is_dropped_then_forwarded_once_open() {
    let (handle, connector) = boot();
    let port = TestPort::open(&handle).await;
    let update = json!({"action": "updateLocation", "driverId": "d1", "latitude": 12.9, "longitude": 77.6});

    connector.hold(ChannelKind::Location);
    port.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    port.send(&handle, json!({"action": "start"})).await;
    assert_eq!(quiesce(&handle).await.location.state, ConnectionState::Connecting);

    port.send(&handle, update.clone()).await;
    let _ = quiesce(&handle).await;

    connector.release(ChannelKind::Location);
    assert_eq!(quiesce(&handle).await.location.state, ConnectionState::Open);
    let upstream = connector.upstream(ChannelKind::Location).unwrap();
    assert!(upstream.frames().is_empty());

    port.send(&handle, update).await;
    let snap = quiesce(&handle).await;
    let frames = upstream.frames();
    assert_eq!(frames.len(), 1);
    let frame: Value = serde_json::from_str(&frames[0]).unwrap();
    assert_eq!(frame, json!({"driver_id": "d1", "latitude": 12.9, "longitude": 77.6}));
    assert_eq!(snap.location_updates_dropped, 1);
    assert_eq!(snap.location_updates_forwarded, 1);
}

// ── Delivery and lifecycle ──────────────────────────────────────────────────

#[tokio::test]
async fn only_ports_registered_at_broadcast_time_receive_it() {
    let (handle, connector) = boot();
    let mut early = TestPort::open(&handle).await;
    early.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    let _ = quiesce(&handle).await;

    let upstream = connector.upstream(ChannelKind::Notification).unwrap();
    assert!(upstream.push("first"));
    let _ = quiesce(&handle).await;

    let mut late = TestPort::open(&handle).await;
    assert!(upstream.push("second"));
    let _ = quiesce(&handle).await;

    assert_eq!(early.pushes(), vec![notification("first"), notification("second")]);
    assert_eq!(late.pushes(), vec![notification("second")]);
}

#[tokio::test]
async fn many_starts_from_many_ports_open_one_socket() {
    let (handle, connector) = boot();
    let mut ports = Vec::new();
    for _ in 0..4 {
        ports.push(TestPort::open(&handle).await);
    }
    connector.hold(ChannelKind::Location);
    ports[0].send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    for port in &ports {
        port.send(&handle, json!({"action": "start"})).await;
        port.send(&handle, json!({"action": "startWebSocket"})).await;
    }
    let _ = quiesce(&handle).await;
    assert_eq!(connector.attempt_count(ChannelKind::Location), 1);

    connector.release(ChannelKind::Location);
    let _ = quiesce(&handle).await;
    for port in &ports {
        port.send(&handle, json!({"action": "start"})).await;
    }
    let snap = quiesce(&handle).await;
    assert_eq!(snap.location.state, ConnectionState::Open);
    assert_eq!(connector.attempt_count(ChannelKind::Location), 1);
    assert_eq!(connector.attempt_count(ChannelKind::Notification), 1);
}

#[tokio::test]
async fn closed_port_is_pruned_and_others_still_served() {
    let (handle, connector) = boot();
    let mut a = TestPort::open(&handle).await;
    let b = TestPort::open(&handle).await;
    let mut c = TestPort::open(&handle).await;
    a.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    let _ = quiesce(&handle).await;

    drop(b.rx);
    assert!(connector.upstream(ChannelKind::Notification).unwrap().push("n"));
    let snap = quiesce(&handle).await;

    assert_eq!(snap.ports, 2);
    assert_eq!(a.pushes(), vec![notification("n")]);
    assert_eq!(c.pushes(), vec![notification("n")]);
}

#[tokio::test]
async fn port_with_full_queue_is_dropped_on_first_miss() {
    let (handle, connector) = boot();
    let mut fast = TestPort::open(&handle).await;
    fast.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    let _ = quiesce(&handle).await;

    let (tx, mut slow_rx) = mpsc::channel(1);
    let _slow = handle.connect_port(Arc::new(tx)).await.unwrap();
    let _ = quiesce(&handle).await;
    assert!(slow_rx.try_recv().is_ok());

    let upstream = connector.upstream(ChannelKind::Notification).unwrap();
    assert!(upstream.push("m1"));
    let _ = quiesce(&handle).await;
    assert!(upstream.push("m2"));
    let snap = quiesce(&handle).await;
    assert_eq!(snap.ports, 1);

    // draining the stalled queue does not bring the port back
    assert_eq!(slow_rx.try_recv().unwrap().as_str(), r#"{"type":"notification","data":"m1"}"#);
    assert!(upstream.push("m3"));
    let _ = quiesce(&handle).await;
    assert!(slow_rx.try_recv().is_err());
    assert_eq!(
        fast.pushes(),
        vec![notification("m1"), notification("m2"), notification("m3")]
    );
}

#[tokio::test]
async fn disconnected_port_receives_nothing_more() {
    let (handle, connector) = boot();
    let mut a = TestPort::open(&handle).await;
    let mut b = TestPort::open(&handle).await;
    a.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    let _ = quiesce(&handle).await;

    handle.disconnect(b.id).await.unwrap();
    assert!(connector.upstream(ChannelKind::Notification).unwrap().push("after"));
    let snap = quiesce(&handle).await;

    assert_eq!(snap.ports, 1);
    assert_eq!(a.pushes(), vec![notification("after")]);
    assert!(b.pushes().is_empty());

    // frames from a forgotten port are ignored
    b.send(&handle, json!({"action": "stop"})).await;
    let _ = quiesce(&handle).await;
}

#[tokio::test(start_paused = true)]
async fn stop_then_start_opens_exactly_one_fresh_socket() {
    let (handle, connector) = boot();
    let port = TestPort::open(&handle).await;
    port.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    port.send(&handle, json!({"action": "start"})).await;
    let _ = quiesce(&handle).await;

    let first = connector.upstream(ChannelKind::Location).unwrap();
    first.close();
    assert_eq!(
        quiesce(&handle).await.location.state,
        ConnectionState::ReconnectPending
    );

    port.send(&handle, json!({"action": "stop"})).await;
    assert_eq!(quiesce(&handle).await.location.state, ConnectionState::Closed);
    port.send(&handle, json!({"action": "start"})).await;
    assert_eq!(quiesce(&handle).await.location.state, ConnectionState::Open);
    assert_eq!(connector.attempt_count(ChannelKind::Location), 2);

    tokio::time::advance(Duration::from_secs(12)).await;
    let snap = quiesce(&handle).await;
    assert_eq!(connector.attempt_count(ChannelKind::Location), 2);
    assert_eq!(snap.location.state, ConnectionState::Open);
    assert!(first.is_released());
}

// ── Other behaviour ─────────────────────────────────────────────────────────

#[tokio::test]
async fn location_acks_reach_every_port() {
    let (handle, connector) = boot();
    let mut a = TestPort::open(&handle).await;
    let mut b = TestPort::open(&handle).await;
    a.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    b.send(&handle, json!({"action": "start"})).await;
    let _ = quiesce(&handle).await;

    assert!(connector.upstream(ChannelKind::Location).unwrap().push(r#"{"status":"ok"}"#));
    let _ = quiesce(&handle).await;

    let ack = OutboundMessage::LocationAck {
        data: r#"{"status":"ok"}"#.into(),
    };
    assert_eq!(a.pushes(), vec![ack.clone()]);
    assert_eq!(b.pushes(), vec![ack]);
}

#[tokio::test]
async fn stop_keeps_session_ports_and_notification_stream() {
    let (handle, connector) = boot();
    let port = TestPort::open(&handle).await;
    port.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    port.send(&handle, json!({"action": "start"})).await;
    let _ = quiesce(&handle).await;

    port.send(&handle, json!({"action": "stopWebSocket"})).await;
    let snap = quiesce(&handle).await;
    assert_eq!(snap.location.state, ConnectionState::Closed);
    assert_eq!(snap.notification.state, ConnectionState::Open);
    assert!(snap.authenticated);
    assert_eq!(snap.ports, 1);
    assert!(connector.upstream(ChannelKind::Location).unwrap().is_released());
}

#[tokio::test]
async fn malformed_messages_are_ignored() {
    let (handle, connector) = boot();
    let port = TestPort::open(&handle).await;
    handle.submit(port.id, "not json".into()).await.unwrap();
    port.send(&handle, json!({"action": "teleport"})).await;
    port.send(&handle, json!({"action": "updateLocation", "driverId": "d1"})).await;
    let snap = quiesce(&handle).await;
    assert!(!snap.authenticated);
    assert!(connector.attempts().is_empty());
    assert_eq!(snap.ports, 1);
}

#[tokio::test]
async fn shutdown_releases_upstreams() {
    let connector = Arc::new(ScriptedConnector::new());
    let (handle, task) = spawn_multiplexer(connector.clone(), &MuxConfig::default());
    let port = TestPort::open(&handle).await;
    port.send(&handle, json!({"action": "setToken", "token": "T1"})).await;
    port.send(&handle, json!({"action": "start"})).await;
    let _ = quiesce(&handle).await;

    handle.shutdown();
    task.await.unwrap();
    settle().await;
    assert!(connector.upstream(ChannelKind::Notification).unwrap().is_released());
    assert!(connector.upstream(ChannelKind::Location).unwrap().is_released());
    assert!(handle.snapshot().await.is_err());
}
