//! # ridelink-mux
//!
//! The shared connection multiplexer. One task owns all state and processes
//! [`MuxEvent`]s in order:
//!
//! - [`PortRegistry`]: the set of connected local consumers
//! - [`Broadcaster`]: fan-out of upstream messages to every port
//! - [`ConnectionSupervisor`]: lifecycle and reconnection of the notification
//!   and location upstreams
//! - [`LocationRelay`]: forwarding of location updates while the socket is open
//! - [`control`]: dispatch of consumer requests onto the above
//!
//! Everything outside the loop talks to it through a cloneable [`MuxHandle`].

#![deny(unsafe_code)]

pub mod broadcast;
pub mod control;
pub mod event;
pub mod metrics;
pub mod multiplexer;
pub mod registry;
pub mod relay;
pub mod supervisor;
pub mod testutil;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use event::{MuxEvent, UpstreamEvent};
pub use multiplexer::{MuxConfig, MuxHandle, MuxSnapshot, Multiplexer, spawn_multiplexer};
pub use registry::{ClientPort, DeliveryError, PortRegistry, PortSink};
pub use relay::{LocationRelay, RelayOutcome};
pub use supervisor::{ChannelSnapshot, ConnectionSupervisor};
