//! # ridelink-server
//!
//! Local HTTP + `WebSocket` gateway in front of the multiplexer.
//!
//! - `/ws`: one upgraded connection is one port
//! - `/health`: uptime, port count and per-channel upstream state
//! - `/metrics`: Prometheus text when a recorder handle is supplied
//! - Ping/pong liveness per port, connection cap, graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::RidelinkServer;
pub use shutdown::ShutdownCoordinator;
