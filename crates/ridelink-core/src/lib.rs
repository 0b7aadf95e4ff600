//! # ridelink-core
//!
//! Foundation types for the ridelink shared connection multiplexer.
//!
//! This crate provides the shared vocabulary that all other ridelink crates depend on:
//!
//! - **Ids**: [`PortId`] newtype for local consumer connections
//! - **Channels**: [`ChannelKind`] and the per-channel [`ConnectionState`] machine
//! - **Messages**: [`ControlRequest`] (consumer → multiplexer) and [`OutboundMessage`] (multiplexer → consumer)
//! - **Session**: [`Session`] holding the bearer token and the identity read from its claims
//! - **Errors**: [`MuxError`] taxonomy via `thiserror`
//! - **Reconnect**: [`ReconnectPolicy`] and the backoff math behind it
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod channel;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod retry;
pub mod session;

pub use channel::{ChannelKind, ConnectionState};
pub use errors::{MuxError, Result};
pub use ids::PortId;
pub use messages::{ControlRequest, LocationUpdate, NotificationEnvelope, OutboundMessage};
pub use retry::ReconnectPolicy;
pub use session::{Identity, Session};
