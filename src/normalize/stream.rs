//! Stream normalizer
//!
//! A pure transform from upstream stream bytes to canonical SSE frames. It
//! holds no I/O; the relay feeds it chunks and writes out whatever frames
//! come back, then reads the accumulated text once the stream ends.

use bytes::Bytes;

use crate::streaming::{
    format_error_event, format_sse_chunk, format_sse_done, parse_line, SseLine, SseLineBuffer,
};

use super::{choice_text, normalize_chunk, EnvelopeDefaults};

#[derive(Debug)]
pub struct StreamNormalizer {
    lines: SseLineBuffer,
    defaults: EnvelopeDefaults,
    content: String,
    chunks: usize,
    done_sent: bool,
}

impl StreamNormalizer {
    pub fn new(defaults: EnvelopeDefaults) -> Self {
        Self {
            lines: SseLineBuffer::new(),
            defaults,
            content: String::new(),
            chunks: 0,
            done_sent: false,
        }
    }

    /// Consume one upstream chunk, returning the frames it completes
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        let lines = self.lines.feed(bytes);
        lines.iter().filter_map(|line| self.process_line(line)).collect()
    }

    /// Close the stream: flush any unterminated line and make sure exactly
    /// one `[DONE]` has been emitted.
    pub fn finish(&mut self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        if let Some(line) = self.lines.flush() {
            frames.extend(self.process_line(&line));
        }
        if !self.done_sent {
            self.done_sent = true;
            frames.push(format_sse_done());
        }
        frames
    }

    /// Terminate the stream with an inline error event
    pub fn fail(&mut self, code: &str, message: &str) -> Vec<Bytes> {
        let mut frames = vec![format_error_event(code, message)];
        if !self.done_sent {
            self.done_sent = true;
            frames.push(format_sse_done());
        }
        frames
    }

    /// Text emitted so far by the first choice
    pub fn accumulated_content(&self) -> &str {
        &self.content
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks
    }

    pub fn done_sent(&self) -> bool {
        self.done_sent
    }

    fn process_line(&mut self, line: &str) -> Option<Bytes> {
        match parse_line(line) {
            SseLine::Ignored => None,
            SseLine::Done => {
                if self.done_sent {
                    return None;
                }
                self.done_sent = true;
                Some(format_sse_done())
            }
            SseLine::Json(value) => {
                let normalized = normalize_chunk(value, &self.defaults);
                self.content.push_str(&choice_text(&normalized, "delta"));
                self.chunks += 1;
                Some(format_sse_chunk(&normalized))
            }
        }
    }
}
