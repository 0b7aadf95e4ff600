//! The set of connected local consumers.

use std::collections::BTreeMap;
use std::sync::Arc;

use ridelink_core::PortId;
use tokio::sync::mpsc;
use tracing::debug;

/// Why a push could not be handed to a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// The port's queue is full.
    Full,
    /// The port is gone.
    Closed,
}

/// Somewhere pushes for one consumer can be handed off without waiting.
pub trait PortSink: Send + Sync {
    /// Enqueue one serialized push.
    fn deliver(&self, message: Arc<String>) -> Result<(), DeliveryError>;
}

impl PortSink for mpsc::Sender<Arc<String>> {
    fn deliver(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        self.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// One registered consumer.
pub struct ClientPort {
    id: PortId,
    sink: Arc<dyn PortSink>,
}

impl ClientPort {
    /// Registry-assigned id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Hand one push to the port.
    pub fn deliver(&self, message: Arc<String>) -> Result<(), DeliveryError> {
        self.sink.deliver(message)
    }

    fn is_sink(&self, sink: &Arc<dyn PortSink>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.sink), Arc::as_ptr(sink))
    }
}

impl std::fmt::Debug for ClientPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPort")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Live ports in registration order.
///
/// Ids increase monotonically, so ordering by id is registration order.
#[derive(Debug, Default)]
pub struct PortRegistry {
    ports: BTreeMap<PortId, ClientPort>,
    next_id: u64,
}

impl PortRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink and return its id.
    ///
    /// Registering the same sink instance again returns the existing id.
    pub fn register(&mut self, sink: Arc<dyn PortSink>) -> PortId {
        if let Some(existing) = self.ports.values().find(|p| p.is_sink(&sink)) {
            return existing.id;
        }
        self.next_id += 1;
        let id = PortId::new(self.next_id);
        let _ = self.ports.insert(id, ClientPort { id, sink });
        debug!(port_id = %id, ports = self.ports.len(), "port registered");
        id
    }

    /// Forget a port. Unknown ids are ignored.
    pub fn unregister(&mut self, id: PortId) -> Option<ClientPort> {
        let removed = self.ports.remove(&id);
        if removed.is_some() {
            debug!(port_id = %id, ports = self.ports.len(), "port unregistered");
        }
        removed
    }

    /// Live ports in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ClientPort> {
        self.ports.values()
    }

    /// Look up one port.
    pub fn get(&self, id: PortId) -> Option<&ClientPort> {
        self.ports.get(&id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: PortId) -> bool {
        self.ports.contains_key(&id)
    }

    /// Number of live ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether no port is registered.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Drop every port.
    pub fn clear(&mut self) {
        self.ports.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> (Arc<dyn PortSink>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(4);
        (Arc::new(tx), rx)
    }

    #[test]
    fn ids_increase_in_registration_order() {
        let mut registry = PortRegistry::new();
        let (a, _ra) = sink();
        let (b, _rb) = sink();
        let (c, _rc) = sink();
        let ia = registry.register(a);
        let ib = registry.register(b);
        let ic = registry.register(c);
        assert!(ia < ib && ib < ic);
        let listed: Vec<_> = registry.list().map(ClientPort::id).collect();
        assert_eq!(listed, vec![ia, ib, ic]);
    }

    #[test]
    fn register_same_sink_is_idempotent() {
        let mut registry = PortRegistry::new();
        let (a, _ra) = sink();
        let first = registry.register(a.clone());
        let second = registry.register(a);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let mut registry = PortRegistry::new();
        let (a, _ra) = sink();
        let id = registry.register(a);
        assert!(registry.unregister(PortId::new(999)).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_not_reused_after_unregister() {
        let mut registry = PortRegistry::new();
        let (a, _ra) = sink();
        let (b, _rb) = sink();
        let ia = registry.register(a);
        let _ = registry.unregister(ia);
        let ib = registry.register(b);
        assert_ne!(ia, ib);
        assert!(!registry.contains(ia));
        assert!(registry.contains(ib));
    }

    #[test]
    fn mpsc_sink_reports_full_and_closed() {
        let (tx, rx) = mpsc::channel::<Arc<String>>(1);
        assert_eq!(tx.deliver(Arc::new("a".into())), Ok(()));
        assert_eq!(tx.deliver(Arc::new("b".into())), Err(DeliveryError::Full));
        drop(rx);
        assert_eq!(tx.deliver(Arc::new("c".into())), Err(DeliveryError::Closed));
    }

    #[test]
    fn port_delivers_through_sink() {
        let mut registry = PortRegistry::new();
        let (a, mut ra) = sink();
        let id = registry.register(a);
        registry
            .get(id)
            .unwrap()
            .deliver(Arc::new("hello".into()))
            .unwrap();
        assert_eq!(ra.try_recv().unwrap().as_str(), "hello");
    }
}
