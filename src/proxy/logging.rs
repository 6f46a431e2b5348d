//! Request logging for relayed exchanges
//!
//! Every line for one exchange carries the same short trace id so a relay
//! can be followed through resolution, attempts and the end of its stream.

use std::time::Instant;
use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

/// Stages of a relay, logged as they are entered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    Authenticating,
    CorrelatingThread,
    AccountingPrompt,
    CallingUpstream { attempt: u32 },
    StreamingReply,
    BufferingReply,
    AccountingCompletion,
    Done,
    Failed(&'static str),
}

/// Context for tracking one relay through the system
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Short id for log correlation
    pub trace_id: String,
    pub start_time: Instant,
    /// Provider display name, known once the credential resolves
    pub provider: Option<String>,
    pub model: String,
    pub streaming: bool,
    pub thread_id: Option<String>,
}

impl RequestContext {
    pub fn new(model: impl Into<String>, streaming: bool) -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            start_time: Instant::now(),
            provider: None,
            model: model.into(),
            streaming,
            thread_id: None,
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    pub fn log_stage(&self, stage: RelayStage) {
        debug!(
            trace_id = %self.trace_id,
            stage = ?stage,
            elapsed_ms = %self.elapsed_ms(),
            "Relay stage"
        );
    }

    pub fn log_request_start(&self) {
        info!(
            trace_id = %self.trace_id,
            provider = ?self.provider,
            model = %self.model,
            streaming = %self.streaming,
            thread_id = ?self.thread_id,
            "Relay started"
        );
    }

    pub fn log_upstream_request(&self, url: &str, attempt: u32, timeout_ms: u128) {
        debug!(
            trace_id = %self.trace_id,
            url = %url,
            attempt = attempt,
            timeout_ms = %timeout_ms,
            elapsed_ms = %self.elapsed_ms(),
            "Sending request to upstream"
        );
    }

    pub fn log_upstream_response(&self, status: u16) {
        info!(
            trace_id = %self.trace_id,
            provider = ?self.provider,
            status = %status,
            elapsed_ms = %self.elapsed_ms(),
            "Response received from upstream"
        );
    }

    pub fn log_request_complete(&self, completion_tokens: Option<u64>) {
        info!(
            trace_id = %self.trace_id,
            provider = ?self.provider,
            model = %self.model,
            streaming = %self.streaming,
            thread_id = ?self.thread_id,
            completion_tokens = ?completion_tokens,
            elapsed_ms = %self.elapsed_ms(),
            "Relay completed"
        );
    }

    pub fn log_stream_started(&self) {
        info!(
            trace_id = %self.trace_id,
            provider = ?self.provider,
            elapsed_ms = %self.elapsed_ms(),
            "Streaming response started"
        );
    }

    pub fn log_stream_ended(&self, chunks: usize) {
        info!(
            trace_id = %self.trace_id,
            provider = ?self.provider,
            chunks = chunks,
            elapsed_ms = %self.elapsed_ms(),
            "Streaming response ended"
        );
    }

    pub fn log_error(&self, error: &str) {
        error!(
            trace_id = %self.trace_id,
            provider = ?self.provider,
            model = %self.model,
            streaming = %self.streaming,
            elapsed_ms = %self.elapsed_ms(),
            error = %error,
            "Relay failed"
        );
    }

    pub fn log_retry(&self, attempt: u32, reason: &str) {
        warn!(
            trace_id = %self.trace_id,
            provider = ?self.provider,
            attempt = attempt,
            reason = %reason,
            elapsed_ms = %self.elapsed_ms(),
            "Retrying upstream call"
        );
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "relay",
            trace_id = %self.trace_id,
            model = %self.model,
            streaming = %self.streaming,
        )
    }
}
