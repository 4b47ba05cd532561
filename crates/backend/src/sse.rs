//! Server-sent event framing and the backend's JSON event envelope.
//!
//! Each SSE `data:` payload is an object `{"event": <tag>, "data": {...}}`. The decoder
//! splits the byte stream into payloads; [`decode_wire_event`] maps one payload to a
//! typed [`StreamEvent`].

use serde::Deserialize;
use serde_json::Value;
use snafu::ResultExt;

use crate::error::{BackendResult, DecodeEventSnafu};
use crate::event::{IMPROVED_PROMPT_SECTION, StreamEvent, StreamKind, StreamTarget};

pub const SECTION_CHANGE_TAG: &str = "section_change";
pub const MESSAGE_TAG: &str = "message";
pub const COMPLETE_TAG: &str = "complete";
pub const ERROR_TAG: &str = "error";
pub const IMPROVED_PROMPT_CHUNK_TAG: &str = "improved_prompt_chunk";
pub const IMPROVED_PROMPT_COMPLETE_TAG: &str = "improved_prompt_complete";

/// Incremental splitter for an SSE byte stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    pending_bytes: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one network chunk and returns every data payload it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending_bytes.extend_from_slice(chunk);
        // Chunks can split a multi-byte character; keep the incomplete tail for next time.
        let valid_up_to = match std::str::from_utf8(&self.pending_bytes) {
            Ok(text) => text.len(),
            Err(error) if error.error_len().is_none() => error.valid_up_to(),
            Err(_) => self.pending_bytes.len(),
        };
        let complete = self.pending_bytes.drain(..valid_up_to).collect::<Vec<_>>();
        self.buffer.push_str(&String::from_utf8_lossy(&complete));

        let mut payloads = Vec::new();
        while let Some((split_idx, delimiter_len)) = find_sse_boundary(&self.buffer) {
            let event_text = self.buffer[..split_idx].to_string();
            self.buffer.drain(..split_idx + delimiter_len);

            if let Some(payload) = extract_data_payload(&event_text) {
                let trimmed = payload.trim();
                if !trimmed.is_empty() {
                    payloads.push(trimmed.to_string());
                }
            }
        }
        payloads
    }

    /// Flushes a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        extract_data_payload(&rest)
            .map(|payload| payload.trim().to_string())
            .filter(|payload| !payload.is_empty())
    }
}

pub fn find_sse_boundary(buffer: &str) -> Option<(usize, usize)> {
    let newline_boundary = buffer.find("\n\n").map(|idx| (idx, 2));
    let carriage_boundary = buffer.find("\r\n\r\n").map(|idx| (idx, 4));

    match (newline_boundary, carriage_boundary) {
        (Some((n_idx, n_len)), Some((c_idx, c_len))) => {
            if n_idx <= c_idx {
                Some((n_idx, n_len))
            } else {
                Some((c_idx, c_len))
            }
        }
        (Some(boundary), None) => Some(boundary),
        (None, Some(boundary)) => Some(boundary),
        (None, None) => None,
    }
}

pub fn extract_data_payload(event: &str) -> Option<String> {
    let mut data_lines: Vec<&str> = Vec::new();

    for raw_line in event.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Maps one data payload to a stream event.
///
/// Returns `Ok(None)` for tags the client does not act on. Generation streams ignore
/// `improved_prompt_complete` because it does not end the turn.
pub fn decode_wire_event(target: StreamTarget, payload: &str) -> BackendResult<Option<StreamEvent>> {
    let wire: WireEvent = serde_json::from_str(payload).context(DecodeEventSnafu {
        stage: "decode-wire-event",
        target,
        payload: payload.to_string(),
    })?;

    let event = match wire.event.as_str() {
        SECTION_CHANGE_TAG => Some(StreamEvent::section_change(string_field(
            &wire.data, "section",
        ))),
        MESSAGE_TAG => Some(StreamEvent::message(
            string_field(&wire.data, "section"),
            string_field(&wire.data, "content"),
        )),
        COMPLETE_TAG => Some(StreamEvent::Complete),
        ERROR_TAG => Some(StreamEvent::error(string_field(&wire.data, "error"))),
        IMPROVED_PROMPT_CHUNK_TAG => Some(StreamEvent::message(
            IMPROVED_PROMPT_SECTION,
            string_field(&wire.data, "chunk"),
        )),
        IMPROVED_PROMPT_COMPLETE_TAG => match target.kind {
            StreamKind::Improvement => Some(StreamEvent::Complete),
            StreamKind::Generation => None,
        },
        other => {
            tracing::debug!(target = ?target, tag = other, "skipping unknown stream event tag");
            None
        }
    };

    Ok(event)
}

fn string_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
