//! Port connections: liveness, frame classification and the per-port driver.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
