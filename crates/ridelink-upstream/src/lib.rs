//! # ridelink-upstream
//!
//! The two upstream transports the multiplexer owns:
//!
//! - **Notification**: an SSE stream fetched with `reqwest` and parsed by [`sse`]
//! - **Location**: a `tokio-tungstenite` WebSocket with a dedicated writer task
//!
//! Both are opened through the [`UpstreamConnector`] trait so the multiplexer
//! can be driven by a scripted connector in tests.

#![deny(unsafe_code)]

pub mod connector;
pub mod error;
pub mod http;
pub mod location;
pub mod notification;
pub mod sse;

pub use connector::{InboundStream, UpstreamConnector, UpstreamLink, endpoint_url};
pub use error::UpstreamError;
pub use http::{ConnectorConfig, Endpoint, HttpConnector};
