//! SSE (Server-Sent Events) framing utilities
//!
//! Line buffering for upstream streams and frame builders for the
//! downstream side.

use bytes::Bytes;
use serde_json::{json, Value};

/// Stream terminator payload
pub const DONE_SENTINEL: &str = "[DONE]";

/// Buffer for accumulating incomplete lines across chunk boundaries.
///
/// Upstream bytes rarely align with line boundaries. Complete lines are
/// returned with the trailing `\n` (and `\r`, if any) removed; blank lines
/// are dropped since SSE only uses them as event separators.
///
/// # Example
/// ```
/// use nexus_relay::streaming::SseLineBuffer;
///
/// let mut buffer = SseLineBuffer::new();
/// assert!(buffer.feed(b"data: {\"a\":").is_empty());
/// assert_eq!(buffer.feed(b"1}\r\n\r\n"), vec!["data: {\"a\":1}"]);
/// ```
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    incomplete: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every line completed by them.
    ///
    /// Bytes are only decoded once a full line is present, so a multi-byte
    /// character split across chunks survives. Invalid UTF-8 inside a
    /// complete line is replaced rather than rejected.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.incomplete.extend_from_slice(bytes);

        let mut complete_lines = Vec::new();
        while let Some(newline_pos) = self.incomplete.iter().position(|&b| b == b'\n') {
            let rest = self.incomplete.split_off(newline_pos + 1);
            let line = std::mem::replace(&mut self.incomplete, rest);
            if let Some(line) = decode_line(&line) {
                complete_lines.push(line);
            }
        }
        complete_lines
    }

    pub fn has_incomplete(&self) -> bool {
        !self.incomplete.is_empty()
    }

    /// Undecoded tail, lossily rendered
    pub fn remaining(&self) -> String {
        String::from_utf8_lossy(&self.incomplete).into_owned()
    }

    /// Take whatever is left once the stream has closed without a final newline
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.incomplete);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let end = raw
        .iter()
        .rposition(|&b| b != b'\n' && b != b'\r')
        .map_or(0, |i| i + 1);
    (end > 0).then(|| String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// One parsed upstream line
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// The line carried the `[DONE]` sentinel
    Done,
    /// A JSON object payload, with or without a `data:` prefix
    Json(Value),
    /// Comments, `event:`/`id:`/`retry:` fields, and undecodable payloads
    Ignored,
}

/// Classify a single complete line from an upstream stream
pub fn parse_line(line: &str) -> SseLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Ignored;
    }
    if line.contains(DONE_SENTINEL) {
        return SseLine::Done;
    }

    let payload = match line.strip_prefix("data:") {
        Some(data) => data.trim_start(),
        None if line.starts_with('{') => line,
        // event:, id:, retry: and anything else
        None => return SseLine::Ignored,
    };

    match serde_json::from_str::<Value>(payload) {
        Ok(value @ Value::Object(_)) => SseLine::Json(value),
        _ => SseLine::Ignored,
    }
}

/// Frame a JSON value as `data: {json}\n\n`
pub fn format_sse_chunk(value: &Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", value))
}

/// `data: [DONE]\n\n`
pub fn format_sse_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Inline error event sent when a stream fails after it has started
pub fn format_error_event(code: &str, message: &str) -> Bytes {
    format_sse_chunk(&json!({
        "error": {
            "code": code,
            "message": message,
        }
    }))
}
