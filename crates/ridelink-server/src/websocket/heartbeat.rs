//! Ping/pong liveness for one port.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Ping `connection` every `interval` until it goes quiet for `timeout`.
///
/// Each tick consumes the alive flag. A tick that finds it unset counts as a
/// miss; `timeout / interval` consecutive misses (at least one) end the loop
/// with [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let mut missed: u32 = 0;
    let max_missed = max_missed(interval, timeout);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
                if !connection.ping() {
                    debug!(port_id = ?connection.port_id(), "ping not queued");
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn max_missed(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    (timeout.as_millis() / interval_ms).clamp(1, u128::from(u32::MAX)) as u32
}
