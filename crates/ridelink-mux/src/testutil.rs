//! Shared test utilities: a scripted upstream connector.
//!
//! [`ScriptedConnector`] records every open attempt and hands out in-memory
//! upstreams that tests drive by hand: push frames, fail, close, read what
//! the multiplexer wrote.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use ridelink_core::ChannelKind;
use ridelink_upstream::{UpstreamConnector, UpstreamError, UpstreamLink};
use tokio::sync::{Semaphore, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Let every runnable task make progress.
///
/// Scripted upstreams do no real I/O, so a burst of yields is enough for
/// spawned tasks to reach their next await point.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// One recorded open attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectAttempt {
    /// Requested channel.
    pub channel: ChannelKind,
    /// Token it was opened with.
    pub token: String,
}

/// An in-memory upstream handed out by [`ScriptedConnector`].
pub struct ScriptedUpstream {
    /// Channel it serves.
    pub channel: ChannelKind,
    /// Token it was opened with.
    pub token: String,
    inbound: Mutex<Option<mpsc::UnboundedSender<Result<String, UpstreamError>>>>,
    released: CancellationToken,
    outbound: Mutex<Option<mpsc::Receiver<String>>>,
}

impl ScriptedUpstream {
    /// Deliver one frame to the multiplexer. `false` once closed.
    pub fn push(&self, payload: &str) -> bool {
        self.inbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(payload.to_string())).is_ok())
    }

    /// End the upstream with a transport error.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = self.inbound.lock().take() {
            let _ = tx.send(Err(UpstreamError::Stream(reason.to_string())));
        }
    }

    /// End the upstream cleanly (peer hung up).
    pub fn close(&self) {
        drop(self.inbound.lock().take());
    }

    /// Next frame the multiplexer wrote, if any.
    pub fn try_recv_frame(&self) -> Option<String> {
        self.outbound.lock().as_mut()?.try_recv().ok()
    }

    /// Every frame written so far.
    pub fn frames(&self) -> Vec<String> {
        std::iter::from_fn(|| self.try_recv_frame()).collect()
    }

    /// Whether the multiplexer let go of this upstream.
    pub fn is_released(&self) -> bool {
        self.released.is_cancelled()
    }
}

#[derive(Default)]
struct Script {
    attempts: Vec<ConnectAttempt>,
    failures: HashMap<ChannelKind, VecDeque<String>>,
    gates: HashMap<ChannelKind, Arc<Semaphore>>,
    upstreams: Vec<Arc<ScriptedUpstream>>,
}

/// Connector whose upstreams are driven by the test.
pub struct ScriptedConnector {
    script: Mutex<Script>,
    outbound_capacity: usize,
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnector {
    /// Connector that opens every channel immediately.
    pub fn new() -> Self {
        Self::with_outbound_capacity(64)
    }

    /// Connector whose location writer queue holds `capacity` frames.
    pub fn with_outbound_capacity(capacity: usize) -> Self {
        Self {
            script: Mutex::new(Script::default()),
            outbound_capacity: capacity.max(1),
        }
    }

    /// Make the next open of `channel` fail with `reason`.
    pub fn fail_next(&self, channel: ChannelKind, reason: &str) {
        self.script
            .lock()
            .failures
            .entry(channel)
            .or_default()
            .push_back(reason.to_string());
    }

    /// Keep opens of `channel` pending until [`Self::release`].
    pub fn hold(&self, channel: ChannelKind) {
        let _ = self
            .script
            .lock()
            .gates
            .insert(channel, Arc::new(Semaphore::new(0)));
    }

    /// Let held opens of `channel` proceed.
    pub fn release(&self, channel: ChannelKind) {
        if let Some(gate) = self.script.lock().gates.remove(&channel) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Every open attempt so far, in order.
    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.script.lock().attempts.clone()
    }

    /// Open attempts for one channel.
    pub fn attempt_count(&self, channel: ChannelKind) -> usize {
        self.script
            .lock()
            .attempts
            .iter()
            .filter(|a| a.channel == channel)
            .count()
    }

    /// Most recently opened upstream for `channel`.
    pub fn upstream(&self, channel: ChannelKind) -> Option<Arc<ScriptedUpstream>> {
        self.script
            .lock()
            .upstreams
            .iter()
            .rev()
            .find(|u| u.channel == channel)
            .cloned()
    }
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    async fn connect(&self, channel: ChannelKind, token: &str) -> Result<UpstreamLink, UpstreamError> {
        let gate = {
            let mut script = self.script.lock();
            script.attempts.push(ConnectAttempt {
                channel,
                token: token.to_string(),
            });
            script.gates.get(&channel).cloned()
        };
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let failure = self
            .script
            .lock()
            .failures
            .get_mut(&channel)
            .and_then(VecDeque::pop_front);
        if let Some(reason) = failure {
            return Err(UpstreamError::Stream(reason));
        }

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let released = CancellationToken::new();
        let guard = released.clone().drop_guard();
        let (outbound, out_rx) = match channel {
            ChannelKind::Location => {
                let (tx, rx) = mpsc::channel(self.outbound_capacity);
                (Some(tx), Some(rx))
            }
            ChannelKind::Notification => (None, None),
        };
        let upstream = Arc::new(ScriptedUpstream {
            channel,
            token: token.to_string(),
            released,
            inbound: Mutex::new(Some(in_tx)),
            outbound: Mutex::new(out_rx),
        });
        self.script.lock().upstreams.push(upstream);

        Ok(UpstreamLink {
            inbound: Box::pin(UnboundedReceiverStream::new(in_rx).map(move |item| {
                let _ = &guard;
                item
            })),
            outbound,
        })
    }
}
