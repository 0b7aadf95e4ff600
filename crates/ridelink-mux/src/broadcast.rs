//! Fan-out of pushes to every registered port.

use std::sync::Arc;

use metrics::{counter, gauge};
use ridelink_core::{MuxError, OutboundMessage, PortId};
use tracing::{debug, warn};

use crate::metrics::{BROADCASTS_TOTAL, BROADCAST_DROPS_TOTAL, PORTS_ACTIVE, PORTS_PRUNED_TOTAL};
use crate::registry::{DeliveryError, PortRegistry};

/// What one broadcast did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Ports registered when the broadcast started.
    pub recipients: usize,
    /// Ports that accepted the message.
    pub delivered: usize,
    /// Ports whose queue was full.
    pub dropped: usize,
    /// Ports removed from the registry.
    pub pruned: Vec<PortId>,
}

/// Delivers pushes to ports without ever waiting on one.
///
/// A port that cannot take a push, closed or full, is unregistered on the
/// spot. Every port still registered has received every broadcast made
/// since it registered.
#[derive(Clone, Copy, Debug, Default)]
pub struct Broadcaster;

impl Broadcaster {
    /// Deliver `message` to every registered port in registration order.
    pub fn broadcast(&self, registry: &mut PortRegistry, message: &OutboundMessage) -> BroadcastReport {
        let Some(json) = serialize(message) else {
            return BroadcastReport::default();
        };
        let mut report = BroadcastReport {
            recipients: registry.len(),
            ..BroadcastReport::default()
        };

        for port in registry.list() {
            match port.deliver(Arc::clone(&json)) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Closed) => {
                    let gone = MuxError::PortGone { port_id: port.id() };
                    debug!(error = %gone, "dropping closed port");
                    counter!(PORTS_PRUNED_TOTAL, "reason" => "closed").increment(1);
                    report.pruned.push(port.id());
                }
                Err(DeliveryError::Full) => {
                    warn!(port_id = %port.id(), "port queue full, disconnecting");
                    report.dropped += 1;
                    counter!(BROADCAST_DROPS_TOTAL).increment(1);
                    counter!(PORTS_PRUNED_TOTAL, "reason" => "full").increment(1);
                    report.pruned.push(port.id());
                }
            }
        }

        for id in &report.pruned {
            let _ = registry.unregister(*id);
        }
        if !report.pruned.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            gauge!(PORTS_ACTIVE).set(registry.len() as f64);
        }

        counter!(BROADCASTS_TOTAL, "type" => message.kind()).increment(1);
        debug!(
            kind = message.kind(),
            recipients = report.recipients,
            delivered = report.delivered,
            "broadcast"
        );
        report
    }

    /// Deliver `message` to one port.
    ///
    /// A port that cannot take the push is unregistered and reported as
    /// [`MuxError::PortGone`].
    pub fn send_to(
        &self,
        registry: &mut PortRegistry,
        port_id: PortId,
        message: &OutboundMessage,
    ) -> Result<(), MuxError> {
        let json = serialize(message).ok_or(MuxError::PortGone { port_id })?;
        let Some(port) = registry.get(port_id) else {
            return Err(MuxError::PortGone { port_id });
        };
        if let Err(e) = port.deliver(json) {
            debug!(port_id = %port_id, error = ?e, "direct push failed, dropping port");
            let _ = registry.unregister(port_id);
            return Err(MuxError::PortGone { port_id });
        }
        Ok(())
    }
}

fn serialize(message: &OutboundMessage) -> Option<Arc<String>> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "failed to serialize push");
            None
        }
    }
}
