//! Classification of inbound `WebSocket` frames.

use axum::extract::ws::Message;
use tracing::debug;

/// What the session driver should do with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A control-protocol request for the multiplexer.
    Submit(String),
    /// Liveness only (ping or pong).
    Alive,
    /// The client is closing.
    Close,
    /// Nothing to do.
    Ignore,
}

/// Classify a frame. Binary frames carrying UTF-8 are treated as text.
pub fn classify(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Submit(text.as_str().to_owned()),
        Message::Binary(data) => match std::str::from_utf8(&data) {
            Ok(text) => Inbound::Submit(text.to_owned()),
            Err(_) => {
                debug!(len = data.len(), "non-UTF8 binary frame ignored");
                Inbound::Ignore
            }
        },
        Message::Ping(_) | Message::Pong(_) => Inbound::Alive,
        Message::Close(_) => Inbound::Close,
    }
}
