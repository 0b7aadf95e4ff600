//! Forwarding of location updates to the location socket.
//!
//! Updates are at-most-once: forwarded immediately while the socket is
//! open, dropped otherwise. Nothing is queued for later and the consumer is
//! never told.

use metrics::counter;
use ridelink_core::{ChannelKind, LocationUpdate};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::metrics::LOCATION_UPDATES_TOTAL;
use crate::supervisor::ConnectionSupervisor;

/// What happened to one update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Handed to the socket writer.
    Forwarded,
    /// The location socket was not open.
    DroppedNotOpen,
    /// The socket writer queue was full.
    DroppedBackpressure,
}

impl RelayOutcome {
    /// Metric label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forwarded => "forwarded",
            Self::DroppedNotOpen => "dropped_not_open",
            Self::DroppedBackpressure => "dropped_backpressure",
        }
    }
}

/// Relays updates onto the location socket.
#[derive(Debug, Default)]
pub struct LocationRelay {
    forwarded: u64,
    dropped: u64,
}

impl LocationRelay {
    /// New relay with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward `update` if the location socket is open.
    pub fn relay(&mut self, supervisor: &ConnectionSupervisor, update: &LocationUpdate) -> RelayOutcome {
        let outcome = match supervisor.location_writer() {
            None => {
                debug!(
                    state = %supervisor.state(ChannelKind::Location),
                    driver_id = %update.driver_id,
                    "location socket not open, update dropped"
                );
                RelayOutcome::DroppedNotOpen
            }
            Some(writer) => match update.to_frame() {
                Err(e) => {
                    warn!(error = %e, "failed to encode location update");
                    RelayOutcome::DroppedNotOpen
                }
                Ok(frame) => match writer.try_send(frame) {
                    Ok(()) => RelayOutcome::Forwarded,
                    Err(TrySendError::Full(_)) => {
                        warn!(driver_id = %update.driver_id, "location writer backlogged, update dropped");
                        RelayOutcome::DroppedBackpressure
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!("location writer gone, update dropped");
                        RelayOutcome::DroppedNotOpen
                    }
                },
            },
        };

        if outcome == RelayOutcome::Forwarded {
            self.forwarded += 1;
        } else {
            self.dropped += 1;
        }
        counter!(LOCATION_UPDATES_TOTAL, "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    /// Updates handed to the writer so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Updates dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
