//! Consumer control protocol dispatch.
//!
//! Text frames from a registered port parse into a [`ControlRequest`] and are
//! routed with one exhaustive match. Malformed frames are logged and dropped;
//! nothing is ever sent back to the port.

use metrics::counter;
use ridelink_core::{ChannelKind, ControlRequest, MuxError, PortId};
use tracing::{debug, instrument, warn};

use crate::metrics::MALFORMED_REQUESTS_TOTAL;
use crate::relay::{LocationRelay, RelayOutcome};
use crate::supervisor::ConnectionSupervisor;

/// What a dispatched request did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// Session token replaced.
    TokenSet,
    /// Location start requested; `Err` when refused.
    LocationStarted(Result<(), MuxError>),
    /// Location stop requested.
    LocationStopped,
    /// Location update relayed or dropped.
    LocationUpdate(RelayOutcome),
}

/// Parse one text frame from `port_id` and apply it.
#[instrument(skip_all, fields(%port_id, action))]
pub fn handle_frame(
    port_id: PortId,
    text: &str,
    supervisor: &mut ConnectionSupervisor,
    relay: &mut LocationRelay,
) -> Result<Dispatched, MuxError> {
    let request = match ControlRequest::parse(text) {
        Ok(request) => request,
        Err(e) => {
            counter!(MALFORMED_REQUESTS_TOTAL).increment(1);
            warn!(error = %e, "ignoring client message");
            return Err(e);
        }
    };
    let _ = tracing::Span::current().record("action", request.action());
    debug!("dispatching control request");
    Ok(dispatch(request, supervisor, relay))
}

/// Apply an already parsed request.
pub fn dispatch(
    request: ControlRequest,
    supervisor: &mut ConnectionSupervisor,
    relay: &mut LocationRelay,
) -> Dispatched {
    match request {
        ControlRequest::SetToken { token } => {
            supervisor.set_token(token);
            Dispatched::TokenSet
        }
        ControlRequest::StartLocation => {
            Dispatched::LocationStarted(supervisor.start(ChannelKind::Location))
        }
        ControlRequest::StopLocation => {
            supervisor.stop(ChannelKind::Location);
            Dispatched::LocationStopped
        }
        ControlRequest::UpdateLocation(update) => {
            Dispatched::LocationUpdate(relay.relay(supervisor, &update))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use ridelink_core::{ConnectionState, ReconnectPolicy};
    use tokio::sync::mpsc;

    use super::*;
    use crate::testutil::ScriptedConnector;

    fn supervisor() -> (ConnectionSupervisor, Arc<ScriptedConnector>) {
        let connector = Arc::new(ScriptedConnector::new());
        let (tx, _rx) = mpsc::channel(16);
        let supervisor = ConnectionSupervisor::new(
            connector.clone(),
            tx,
            ReconnectPolicy::default(),
            ReconnectPolicy::default(),
        );
        (supervisor, connector)
    }

    #[tokio::test]
    async fn set_token_starts_notification() {
        let (mut sup, _c) = supervisor();
        let mut relay = LocationRelay::new();
        let out = handle_frame(
            PortId::new(1),
            r#"{"action":"setToken","token":"T1"}"#,
            &mut sup,
            &mut relay,
        )
        .unwrap();
        assert_eq!(out, Dispatched::TokenSet);
        assert_eq!(sup.state(ChannelKind::Notification), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn start_without_token_reports_auth_missing() {
        let (mut sup, _c) = supervisor();
        let mut relay = LocationRelay::new();
        let out = handle_frame(PortId::new(1), r#"{"action":"startWebSocket"}"#, &mut sup, &mut relay)
            .unwrap();
        assert_matches!(
            out,
            Dispatched::LocationStarted(Err(MuxError::AuthMissing { channel: ChannelKind::Location }))
        );
        assert_eq!(sup.state(ChannelKind::Location), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn stop_and_update_route() {
        let (mut sup, _c) = supervisor();
        let mut relay = LocationRelay::new();
        assert_eq!(
            handle_frame(PortId::new(1), r#"{"action":"stop"}"#, &mut sup, &mut relay).unwrap(),
            Dispatched::LocationStopped
        );
        let out = handle_frame(
            PortId::new(1),
            r#"{"action":"updateLocation","driverId":"d1","latitude":1,"longitude":2}"#,
            &mut sup,
            &mut relay,
        )
        .unwrap();
        assert_eq!(out, Dispatched::LocationUpdate(RelayOutcome::DroppedNotOpen));
    }

    #[tokio::test]
    async fn malformed_frames_change_nothing() {
        let (mut sup, connector) = supervisor();
        let mut relay = LocationRelay::new();
        for text in ["", "not json", r#"{"action":"fly"}"#, r#"{"action":"setToken"}"#, "[1,2]"] {
            assert_matches!(
                handle_frame(PortId::new(3), text, &mut sup, &mut relay),
                Err(MuxError::MalformedClientMessage { .. })
            );
        }
        assert!(sup.session().token().is_none());
        assert_eq!(connector.attempts().len(), 0);
    }
}
