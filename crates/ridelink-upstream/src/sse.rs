//! # SSE Parser
//!
//! Turns a chunked HTTP body into Server-Sent Event payloads:
//! - Line buffering across chunk boundaries (`\n` or `\r\n`)
//! - `data:` lines of one event joined with `\n`, dispatched on a blank line
//! - Comments (`:` keep-alives) and other fields (`event:`, `id:`, `retry:`) skipped
//! - A trailing event without its blank line is still delivered at end of stream

use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::UpstreamError;

/// Parse SSE events from a byte stream and yield each event's data.
///
/// A read error is yielded once as [`UpstreamError::Stream`], after which the
/// stream ends.
pub fn parse_sse_events<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, UpstreamError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), Vec::<String>::new(), false),
        |(mut stream, mut buffer, mut data_lines, done)| async move {
            if done {
                return None;
            }

            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    if line_bytes.last() == Some(&b'\r') {
                        line_bytes.truncate(line_bytes.len() - 1);
                    }

                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        debug!("skipping non-UTF-8 SSE line");
                        continue;
                    };

                    if line.is_empty() {
                        if let Some(event) = take_event(&mut data_lines) {
                            return Some((Ok(event), (stream, buffer, data_lines, false)));
                        }
                        continue;
                    }

                    if let Some(data) = extract_sse_data(line) {
                        data_lines.push(data.to_string());
                    }
                    continue;
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        warn!(error = %e, "SSE stream read error");
                        let err = UpstreamError::Stream(e.to_string());
                        return Some((Err(err), (stream, buffer, data_lines, true)));
                    }
                    None => {
                        if let Ok(rest) = std::str::from_utf8(&buffer) {
                            if let Some(data) = extract_sse_data(rest.trim_end_matches(['\r', '\n'])) {
                                data_lines.push(data.to_string());
                            }
                        }
                        buffer.clear();
                        let event = take_event(&mut data_lines)?;
                        return Some((Ok(event), (stream, buffer, data_lines, true)));
                    }
                }
            }
        },
    )
}

fn take_event(data_lines: &mut Vec<String>) -> Option<String> {
    if data_lines.is_empty() {
        return None;
    }
    let event = data_lines.join("\n");
    data_lines.clear();
    if event.is_empty() { None } else { Some(event) }
}

/// Data payload of one SSE line, or `None` for comments and non-data fields.
fn extract_sse_data(line: &str) -> Option<&str> {
    if line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data")?;
    if data.is_empty() {
        return Some("");
    }
    // Only "data:" is the data field; "database: x" is not.
    let data = data.strip_prefix(':')?;
    Some(data.strip_prefix(' ').unwrap_or(data))
}
