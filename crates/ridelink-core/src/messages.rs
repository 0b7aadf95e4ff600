//! Wire messages exchanged with local consumers.
//!
//! Consumers send [`ControlRequest`]s, tagged by an `action` field. The
//! multiplexer pushes [`OutboundMessage`]s, tagged by a `type` field.

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{MuxError, Result};
use crate::ids::PortId;

// ─────────────────────────────────────────────────────────────────────────────
// Consumer → multiplexer
// ─────────────────────────────────────────────────────────────────────────────

/// A control request from a consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ControlRequest {
    /// Replace the session token and bring up the notification stream.
    #[serde(rename = "setToken")]
    SetToken {
        /// Bearer token (a JWT in practice).
        token: String,
    },
    /// Open the location socket.
    #[serde(rename = "start", alias = "startWebSocket")]
    StartLocation,
    /// Close the location socket.
    #[serde(rename = "stop", alias = "stopWebSocket")]
    StopLocation,
    /// Relay a position fix on the location socket.
    #[serde(rename = "updateLocation")]
    UpdateLocation(LocationUpdate),
}

impl ControlRequest {
    /// Parse and validate one text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let request: Self =
            serde_json::from_str(text).map_err(|e| MuxError::malformed(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Action name as it appears on the wire.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::SetToken { .. } => "setToken",
            Self::StartLocation => "start",
            Self::StopLocation => "stop",
            Self::UpdateLocation(_) => "updateLocation",
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::SetToken { token } if token.trim().is_empty() => {
                Err(MuxError::malformed("setToken requires a non-empty token"))
            }
            Self::UpdateLocation(update) => update.validate(),
            _ => Ok(()),
        }
    }
}

/// One position fix for a driver.
///
/// Accepted as `driverId` or `driver_id`, holding a string or a number;
/// always sent upstream as a string `driver_id`, which is what the location
/// service reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// Driver the fix belongs to.
    #[serde(
        rename(serialize = "driver_id", deserialize = "driverId"),
        alias = "driver_id",
        deserialize_with = "string_or_number"
    )]
    pub driver_id: String,
    /// Degrees, -90..=90.
    pub latitude: f64,
    /// Degrees, -180..=180.
    pub longitude: f64,
}

impl LocationUpdate {
    fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(MuxError::malformed(format!(
                "latitude {} out of range",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(MuxError::malformed(format!(
                "longitude {} out of range",
                self.longitude
            )));
        }
        Ok(())
    }

    /// Frame sent on the location socket.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Token payloads carry the user id as an integer, and pages copy it as is.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "driver id must be a string or a number, got {other}"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Multiplexer → consumer
// ─────────────────────────────────────────────────────────────────────────────

/// A push to consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// One event from the notification stream, payload verbatim.
    Notification {
        /// Raw event data.
        data: String,
    },
    /// One frame from the location socket, payload verbatim.
    LocationAck {
        /// Raw frame text.
        data: String,
    },
    /// Greeting sent to a port right after it registers.
    Connected {
        /// The id the registry assigned.
        #[serde(rename = "portId")]
        port_id: PortId,
    },
}

impl OutboundMessage {
    /// Wire `type` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Notification { .. } => "notification",
            Self::LocationAck { .. } => "location_ack",
            Self::Connected { .. } => "connected",
        }
    }
}

/// Shape of a notification event as the notification service emits it.
///
/// Payloads are relayed verbatim; this is only read for logging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// Human-readable text.
    pub message: String,
    /// Event status (e.g. `ride_requested`).
    pub status: String,
    /// Arbitrary event parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

impl NotificationEnvelope {
    /// Best-effort parse of an event payload.
    #[must_use]
    pub fn peek(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_set_token() {
        let req = ControlRequest::parse(r#"{"action":"setToken","token":"T1"}"#).unwrap();
        assert_eq!(req, ControlRequest::SetToken { token: "T1".into() });
        assert_eq!(req.action(), "setToken");
    }

    #[test]
    fn start_and_stop_accept_both_spellings() {
        for text in [r#"{"action":"start"}"#, r#"{"action":"startWebSocket"}"#] {
            assert_eq!(ControlRequest::parse(text).unwrap(), ControlRequest::StartLocation);
        }
        for text in [r#"{"action":"stop"}"#, r#"{"action":"stopWebSocket"}"#] {
            assert_eq!(ControlRequest::parse(text).unwrap(), ControlRequest::StopLocation);
        }
    }

    #[test]
    fn unit_actions_ignore_extra_fields() {
        let req = ControlRequest::parse(r#"{"action":"start","data":{}}"#).unwrap();
        assert_eq!(req, ControlRequest::StartLocation);
    }

    #[test]
    fn update_location_accepts_camel_and_snake_driver_id() {
        let camel = ControlRequest::parse(
            r#"{"action":"updateLocation","driverId":"d1","latitude":10.5,"longitude":-20.25}"#,
        )
        .unwrap();
        let snake = ControlRequest::parse(
            r#"{"action":"updateLocation","driver_id":"d1","latitude":10.5,"longitude":-20.25}"#,
        )
        .unwrap();
        assert_eq!(camel, snake);
        assert_matches!(camel, ControlRequest::UpdateLocation(u) if u.driver_id == "d1");
    }

    #[test]
    fn update_location_accepts_numeric_driver_id() {
        let request = ControlRequest::parse(
            r#"{"action":"updateLocation","driver_id":42,"latitude":12.9,"longitude":77.5}"#,
        )
        .unwrap();
        let ControlRequest::UpdateLocation(update) = request else {
            panic!("expected updateLocation");
        };
        assert_eq!(update.driver_id, "42");
        let frame: serde_json::Value = serde_json::from_str(&update.to_frame().unwrap()).unwrap();
        assert_eq!(frame, json!({"driver_id": "42", "latitude": 12.9, "longitude": 77.5}));
    }

    #[test]
    fn update_location_rejects_structured_driver_id() {
        let err = ControlRequest::parse(
            r#"{"action":"updateLocation","driverId":{"id":1},"latitude":1.0,"longitude":2.0}"#,
        )
        .unwrap_err();
        assert_matches!(err, MuxError::MalformedClientMessage { .. });
    }

    #[test]
    fn location_frame_uses_snake_case_driver_id() {
        let update = LocationUpdate {
            driver_id: "d9".into(),
            latitude: 1.0,
            longitude: 2.0,
        };
        let frame: serde_json::Value = serde_json::from_str(&update.to_frame().unwrap()).unwrap();
        assert_eq!(frame, json!({"driver_id": "d9", "latitude": 1.0, "longitude": 2.0}));
    }

    #[test]
    fn unknown_action_is_malformed() {
        let err = ControlRequest::parse(r#"{"action":"dance"}"#).unwrap_err();
        assert_matches!(err, MuxError::MalformedClientMessage { .. });
    }

    #[test]
    fn missing_action_is_malformed() {
        let err = ControlRequest::parse(r#"{"token":"T1"}"#).unwrap_err();
        assert_matches!(err, MuxError::MalformedClientMessage { .. });
    }

    #[test]
    fn missing_field_is_malformed() {
        let err = ControlRequest::parse(r#"{"action":"setToken"}"#).unwrap_err();
        assert_matches!(err, MuxError::MalformedClientMessage { .. });

        let err =
            ControlRequest::parse(r#"{"action":"updateLocation","driverId":"d1","latitude":1}"#)
                .unwrap_err();
        assert_matches!(err, MuxError::MalformedClientMessage { .. });
    }

    #[test]
    fn not_json_is_malformed() {
        assert_matches!(
            ControlRequest::parse("hello"),
            Err(MuxError::MalformedClientMessage { .. })
        );
    }

    #[test]
    fn empty_token_rejected() {
        assert_matches!(
            ControlRequest::parse(r#"{"action":"setToken","token":"  "}"#),
            Err(MuxError::MalformedClientMessage { .. })
        );
    }

    #[test]
    fn out_of_range_coordinates_rejected() {
        let lat = ControlRequest::parse(
            r#"{"action":"updateLocation","driverId":"d1","latitude":91,"longitude":0}"#,
        );
        assert_matches!(lat, Err(MuxError::MalformedClientMessage { reason }) if reason.contains("latitude"));
        let lon = ControlRequest::parse(
            r#"{"action":"updateLocation","driverId":"d1","latitude":0,"longitude":-180.5}"#,
        );
        assert_matches!(lon, Err(MuxError::MalformedClientMessage { reason }) if reason.contains("longitude"));
    }

    #[test]
    fn outbound_wire_shapes() {
        let n = serde_json::to_value(OutboundMessage::Notification { data: "x".into() }).unwrap();
        assert_eq!(n, json!({"type": "notification", "data": "x"}));

        let a = serde_json::to_value(OutboundMessage::LocationAck { data: "ok".into() }).unwrap();
        assert_eq!(a, json!({"type": "location_ack", "data": "ok"}));

        let c = serde_json::to_value(OutboundMessage::Connected {
            port_id: PortId::new(2),
        })
        .unwrap();
        assert_eq!(c, json!({"type": "connected", "portId": 2}));
    }

    #[test]
    fn envelope_peek() {
        let env =
            NotificationEnvelope::peek(r#"{"message":"Ride accepted","status":"accepted","params":{"ride_id":3}}"#)
                .unwrap();
        assert_eq!(env.status, "accepted");
        assert_eq!(env.params["ride_id"], 3);
        assert!(NotificationEnvelope::peek("plain text").is_none());
    }
}
