//! Mock upstream provider for testing
//!
//! Wraps a wiremock server answering `POST /v1/chat/completions` the way an
//! OpenAI-compatible provider would, including the quirks the relay has to
//! smooth over (missing envelope fields, `message` instead of `delta`).

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

use crate::common::constants::UPSTREAM_SECRET;

/// Default path the relay posts to when the provider base URL has no marker
pub const CHAT_PATH: &str = "/v1/chat/completions";

/// Mock upstream provider wrapper
pub struct MockUpstream {
    server: MockServer,
}

impl MockUpstream {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Every request the upstream has seen so far
    pub async fn received(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    pub async fn request_count(&self) -> usize {
        self.received().await.len()
    }

    fn chat(&self, at: &str) -> wiremock::MockBuilder {
        Mock::given(method("POST"))
            .and(path(at.to_string()))
            .and(header("authorization", format!("Bearer {}", UPSTREAM_SECRET).as_str()))
    }

    /// Non-streaming success with a JSON body
    pub async fn mock_chat_success(&self, body: Value) {
        self.mock_chat_success_at(CHAT_PATH, body).await;
    }

    /// Non-streaming success on a custom path
    pub async fn mock_chat_success_at(&self, at: &str, body: Value) {
        self.chat(at)
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Streaming success; `sse` is the raw event-stream body
    pub async fn mock_chat_stream(&self, sse: String) {
        self.chat(CHAT_PATH)
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&self.server)
            .await;
    }

    /// Error status with a body and extra response headers
    pub async fn mock_chat_error(&self, status: u16, body: Value, headers: &[(&str, &str)]) {
        let mut template = ResponseTemplate::new(status).set_body_json(body);
        for (name, value) in headers {
            template = template.insert_header(*name, *value);
        }
        self.chat(CHAT_PATH)
            .respond_with(template)
            .mount(&self.server)
            .await;
    }

    /// The first `times` requests hang for `delay`, later ones succeed with `body`
    pub async fn mock_chat_slow_then_success(&self, delay: Duration, times: u64, body: Value) {
        self.chat(CHAT_PATH)
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body.clone())
                    .set_delay(delay),
            )
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;

        self.chat(CHAT_PATH)
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .with_priority(2)
            .mount(&self.server)
            .await;
    }

    /// Every request hangs for `delay`
    pub async fn mock_chat_always_slow(&self, delay: Duration) {
        self.chat(CHAT_PATH)
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(UpstreamTestData::completion("late"))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }
}

/// Canned upstream payloads
pub struct UpstreamTestData;

impl UpstreamTestData {
    /// Standard OpenAI-shaped completion
    pub fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-upstream-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        })
    }

    /// Vendor envelope with no id/object/created and a bare `response` field
    pub fn divergent_completion(content: &str) -> Value {
        json!({
            "result_id": "as-1",
            "response": content
        })
    }

    /// Event stream whose chunks use `message` and omit the envelope fields
    pub fn message_shaped_stream(parts: &[&str]) -> String {
        let mut body = String::new();
        for part in parts {
            let chunk = json!({
                "choices": [{"message": {"content": part}}]
            });
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    /// Well-formed OpenAI stream with a keep-alive comment and a trailing DONE
    pub fn standard_stream(parts: &[&str]) -> String {
        let mut body = String::from(": keep-alive\n\n");
        for part in parts {
            let chunk = json!({
                "id": "chatcmpl-upstream-s",
                "object": "chat.completion.chunk",
                "created": 1_700_000_000,
                "model": "gpt-4o-mini",
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": part}, "finish_reason": null}]
            });
            body.push_str(&format!("data: {}\r\n\r\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }
}
