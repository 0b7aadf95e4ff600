//! Lifecycle of the notification and location upstreams.
//!
//! The supervisor never performs I/O itself. Opening an upstream spawns an
//! I/O task that reports back through [`MuxEvent::Upstream`]; reconnect
//! timers report through [`MuxEvent::ReconnectDue`]. Every activation bumps
//! the channel's generation, and events carrying an older generation are
//! ignored, so a task or timer that outlives its activation can never
//! change state.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use ridelink_core::{
    ChannelKind, ConnectionState, MuxError, NotificationEnvelope, OutboundMessage, ReconnectPolicy,
    Session,
};
use ridelink_upstream::UpstreamConnector;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::event::{MuxEvent, UpstreamEvent};
use crate::metrics::{UPSTREAM_CONNECT_ATTEMPTS_TOTAL, UPSTREAM_RECONNECTS_TOTAL};

// ─────────────────────────────────────────────────────────────────────────────
// Per-channel state
// ─────────────────────────────────────────────────────────────────────────────

/// Point-in-time view of one upstream, for `/health` and tests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelSnapshot {
    /// Which upstream.
    pub channel: ChannelKind,
    /// Current state.
    pub state: ConnectionState,
    /// Reconnects scheduled since the last successful open.
    pub retry_count: u32,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
    /// Current activation.
    pub generation: u64,
    /// Delay of the pending reconnect, if one is scheduled.
    pub reconnect_in_ms: Option<u64>,
}

struct PendingReconnect {
    generation: u64,
    delay: Duration,
    cancel: CancellationToken,
}

struct UpstreamConnection {
    channel: ChannelKind,
    state: ConnectionState,
    policy: ReconnectPolicy,
    retry_count: u32,
    last_error: Option<MuxError>,
    generation: u64,
    link: Option<CancellationToken>,
    outbound: Option<mpsc::Sender<String>>,
    reconnect: Option<PendingReconnect>,
}

impl UpstreamConnection {
    fn new(channel: ChannelKind, policy: ReconnectPolicy) -> Self {
        Self {
            channel,
            state: ConnectionState::Idle,
            policy,
            retry_count: 0,
            last_error: None,
            generation: 0,
            link: None,
            outbound: None,
            reconnect: None,
        }
    }

    /// Cancel the I/O task and drop the writer queue (closing the socket).
    fn release_link(&mut self) {
        if let Some(cancel) = self.link.take() {
            cancel.cancel();
        }
        self.outbound = None;
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            pending.cancel.cancel();
            debug!(channel = %self.channel, generation = pending.generation, "reconnect timer cancelled");
        }
    }

    fn snapshot(&self) -> ChannelSnapshot {
        ChannelSnapshot {
            channel: self.channel,
            state: self.state,
            retry_count: self.retry_count,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            generation: self.generation,
            reconnect_in_ms: self
                .reconnect
                .as_ref()
                .map(|p| u64::try_from(p.delay.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task spawning
// ─────────────────────────────────────────────────────────────────────────────

struct Spawner {
    connector: Arc<dyn UpstreamConnector>,
    events: mpsc::Sender<MuxEvent>,
}

impl Spawner {
    /// Start a new activation of `conn` and spawn its I/O task.
    fn open(&self, conn: &mut UpstreamConnection, token: String) {
        conn.generation += 1;
        conn.state = ConnectionState::Connecting;
        let cancel = CancellationToken::new();
        conn.link = Some(cancel.clone());
        counter!(UPSTREAM_CONNECT_ATTEMPTS_TOTAL, "channel" => conn.channel.as_str()).increment(1);
        info!(
            channel = %conn.channel,
            generation = conn.generation,
            retry_count = conn.retry_count,
            "opening upstream"
        );
        let _ = tokio::spawn(run_link(
            Arc::clone(&self.connector),
            conn.channel,
            token,
            conn.generation,
            self.events.clone(),
            cancel,
        ));
    }

    /// Arm the reconnect timer for the current activation of `conn`.
    fn schedule_reconnect(&self, conn: &mut UpstreamConnection) {
        let delay = conn.policy.delay_for(conn.retry_count, rand::random::<f64>());
        conn.retry_count += 1;
        conn.state = ConnectionState::ReconnectPending;

        let channel = conn.channel;
        let generation = conn.generation;
        let cancel = CancellationToken::new();
        conn.reconnect = Some(PendingReconnect {
            generation,
            delay,
            cancel: cancel.clone(),
        });
        counter!(UPSTREAM_RECONNECTS_TOTAL, "channel" => channel.as_str()).increment(1);
        info!(
            %channel,
            generation,
            retry_count = conn.retry_count,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );

        let deadline = tokio::time::Instant::now() + delay;
        let events = self.events.clone();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    let _ = events.send(MuxEvent::ReconnectDue { channel, generation }).await;
                }
            }
        });
    }
}

/// I/O task for one activation: open, then forward frames until the
/// upstream ends or the activation is cancelled.
async fn run_link(
    connector: Arc<dyn UpstreamConnector>,
    channel: ChannelKind,
    token: String,
    generation: u64,
    events: mpsc::Sender<MuxEvent>,
    cancel: CancellationToken,
) {
    let emit = |event| MuxEvent::Upstream {
        channel,
        generation,
        event,
    };

    let opened = tokio::select! {
        () = cancel.cancelled() => return,
        result = connector.connect(channel, &token) => result,
    };
    let mut link = match opened {
        Ok(link) => link,
        Err(e) => {
            let _ = events
                .send(emit(UpstreamEvent::ConnectFailed {
                    reason: e.to_string(),
                }))
                .await;
            return;
        }
    };

    let outbound = link.outbound.take();
    if events.send(emit(UpstreamEvent::Opened { outbound })).await.is_err() {
        return;
    }

    let reason = loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            item = link.inbound.next() => match item {
                Some(Ok(payload)) => {
                    if events.send(emit(UpstreamEvent::Message { payload })).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        }
    };
    let _ = events.send(emit(UpstreamEvent::Closed { reason })).await;
}

// ─────────────────────────────────────────────────────────────────────────────
// ConnectionSupervisor
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the session and both upstream connections.
pub struct ConnectionSupervisor {
    session: Session,
    notification: UpstreamConnection,
    location: UpstreamConnection,
    spawner: Spawner,
}

impl ConnectionSupervisor {
    /// Supervisor with both upstreams idle and no session.
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        events: mpsc::Sender<MuxEvent>,
        notification_policy: ReconnectPolicy,
        location_policy: ReconnectPolicy,
    ) -> Self {
        Self {
            session: Session::default(),
            notification: UpstreamConnection::new(ChannelKind::Notification, notification_policy),
            location: UpstreamConnection::new(ChannelKind::Location, location_policy),
            spawner: Spawner { connector, events },
        }
    }

    /// The current session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Replace the session token, then bring up the notification stream.
    ///
    /// A notification stream that is already live keeps running on the old
    /// token; reconnects pick up the new one.
    pub fn set_token(&mut self, token: String) {
        self.session.set_token(token);
        let identity = self.session.identity();
        info!(
            user_id = identity.and_then(|i| i.user_id.as_deref()),
            user = identity.and_then(|i| i.user.as_deref()),
            "session token set"
        );
        let _ = self.start(ChannelKind::Notification);
    }

    /// Open `channel` if it is idle or closed.
    ///
    /// Starting an upstream that is connecting, open, or waiting to
    /// reconnect is a no-op. Without a session token nothing happens and
    /// [`MuxError::AuthMissing`] is returned (and recorded).
    pub fn start(&mut self, channel: ChannelKind) -> Result<(), MuxError> {
        let token = self.session.token().map(str::to_owned);
        let (conn, spawner) = self.parts(channel);

        if !conn.state.can_start() {
            debug!(%channel, state = %conn.state, "start ignored, upstream already active");
            return Ok(());
        }
        let Some(token) = token else {
            let err = MuxError::AuthMissing { channel };
            warn!(%channel, error = %err, "start refused");
            conn.last_error = Some(err.clone());
            return Err(err);
        };

        conn.retry_count = 0;
        spawner.open(conn, token);
        Ok(())
    }

    /// Close `channel` and cancel any pending reconnect.
    pub fn stop(&mut self, channel: ChannelKind) {
        let (conn, _) = self.parts(channel);
        conn.cancel_reconnect();
        if !conn.state.is_active() {
            debug!(%channel, state = %conn.state, "stop ignored, upstream not active");
            return;
        }

        conn.state = ConnectionState::Closing;
        conn.generation += 1;
        conn.release_link();
        conn.retry_count = 0;
        conn.state = ConnectionState::Closed;
        info!(%channel, "upstream stopped");
    }

    /// Stop both upstreams.
    pub fn stop_all(&mut self) {
        for channel in ChannelKind::ALL {
            self.stop(channel);
        }
    }

    /// Apply an event from an upstream I/O task.
    ///
    /// Returns the push to broadcast, if the event carried a payload.
    pub fn on_upstream(
        &mut self,
        channel: ChannelKind,
        generation: u64,
        event: UpstreamEvent,
    ) -> Option<OutboundMessage> {
        let (conn, spawner) = self.parts(channel);
        if generation != conn.generation {
            trace!(%channel, generation, current = conn.generation, "stale upstream event ignored");
            return None;
        }

        match event {
            UpstreamEvent::Opened { outbound } => {
                if conn.state != ConnectionState::Connecting {
                    return None;
                }
                conn.state = ConnectionState::Open;
                conn.retry_count = 0;
                conn.last_error = None;
                conn.outbound = outbound;
                info!(%channel, generation, "upstream open");
                None
            }
            UpstreamEvent::ConnectFailed { reason } => {
                if conn.state != ConnectionState::Connecting {
                    return None;
                }
                let err = MuxError::UpstreamConnect { channel, reason };
                warn!(%channel, generation, error = %err, "upstream connect failed");
                Self::after_failure(conn, spawner, err);
                None
            }
            UpstreamEvent::Message { payload } => {
                if conn.state != ConnectionState::Open {
                    return None;
                }
                Some(match channel {
                    ChannelKind::Notification => {
                        if let Some(envelope) = NotificationEnvelope::peek(&payload) {
                            debug!(status = %envelope.status, "notification received");
                        }
                        OutboundMessage::Notification { data: payload }
                    }
                    ChannelKind::Location => OutboundMessage::LocationAck { data: payload },
                })
            }
            UpstreamEvent::Closed { reason } => {
                if conn.state != ConnectionState::Open {
                    return None;
                }
                let err = MuxError::UpstreamClosedUnexpectedly { channel, reason };
                warn!(%channel, generation, error = %err, "upstream lost");
                Self::after_failure(conn, spawner, err);
                None
            }
        }
    }

    /// A reconnect timer fired.
    pub fn on_reconnect_due(&mut self, channel: ChannelKind, generation: u64) {
        let token = self.session.token().map(str::to_owned);
        let (conn, spawner) = self.parts(channel);

        let armed = conn
            .reconnect
            .as_ref()
            .is_some_and(|p| p.generation == generation);
        if !armed || conn.state != ConnectionState::ReconnectPending {
            trace!(%channel, generation, "stale reconnect timer ignored");
            return;
        }
        conn.reconnect = None;

        match token {
            Some(token) => spawner.open(conn, token),
            None => {
                let err = MuxError::AuthMissing { channel };
                warn!(%channel, error = %err, "reconnect abandoned");
                conn.last_error = Some(err);
                conn.state = ConnectionState::Closed;
            }
        }
    }

    /// Current state of `channel`.
    pub fn state(&self, channel: ChannelKind) -> ConnectionState {
        self.conn(channel).state
    }

    /// Writer queue of the location socket, present only while it is open.
    pub fn location_writer(&self) -> Option<&mpsc::Sender<String>> {
        if self.location.state == ConnectionState::Open {
            self.location.outbound.as_ref()
        } else {
            None
        }
    }

    /// Point-in-time view of `channel`.
    pub fn snapshot(&self, channel: ChannelKind) -> ChannelSnapshot {
        self.conn(channel).snapshot()
    }

    fn after_failure(conn: &mut UpstreamConnection, spawner: &Spawner, err: MuxError) {
        conn.release_link();
        conn.last_error = Some(err);
        if conn.policy.allows(conn.retry_count) {
            spawner.schedule_reconnect(conn);
        } else {
            if conn.policy.enabled {
                warn!(channel = %conn.channel, attempts = conn.retry_count, "giving up on upstream");
            }
            conn.state = ConnectionState::Closed;
        }
    }

    fn conn(&self, channel: ChannelKind) -> &UpstreamConnection {
        match channel {
            ChannelKind::Notification => &self.notification,
            ChannelKind::Location => &self.location,
        }
    }

    fn parts(&mut self, channel: ChannelKind) -> (&mut UpstreamConnection, &Spawner) {
        match channel {
            ChannelKind::Notification => (&mut self.notification, &self.spawner),
            ChannelKind::Location => (&mut self.location, &self.spawner),
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        for conn in [&mut self.notification, &mut self.location] {
            conn.cancel_reconnect();
            conn.release_link();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
