//! Non-streaming chat completions through the relay

use std::time::Duration;

use axum::http::{header, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use nexus_relay::store::{Direction, NewProvider};
use nexus_relay::ProviderStore;

use crate::common::{bearer, chat_body, constants::*, thread_id_of, TestApp, TestOptions};
use crate::mocks::{MockTokenizer, UpstreamTestData};

#[tokio::test]
async fn test_buffered_reply_is_relayed_and_accounted() {
    let app = TestApp::spawn().await;
    let upstream_body = UpstreamTestData::completion("Hi there!");
    app.upstream.mock_chat_success(upstream_body.clone()).await;

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body, upstream_body);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );

    let thread_id = thread_id_of(&response);
    let events = app.wait_for_events(&thread_id, 2).await;
    assert_eq!(events.len(), 2);

    assert_eq!(events[0].direction, Direction::Prompt);
    assert_eq!(events[0].provider_id, app.provider_id);
    assert_eq!(events[0].model_name, MODEL);
    assert_eq!(events[0].message_text.as_deref(), Some("Hello"));
    assert!(events[0].tokens > 0);

    assert_eq!(events[1].direction, Direction::Completion);
    assert_eq!(events[1].message_text.as_deref(), Some("Hi there!"));
    assert!(events[1].tokens > 0);
}

#[tokio::test]
async fn test_upstream_receives_original_body_and_upstream_secret() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("ok"))
        .await;

    let request = json!({
        "model": MODEL,
        "temperature": 0.2,
        "messages": [{"role": "user", "content": "keep my fields"}]
    });
    app.chat(&request).await.assert_status_ok();

    let received = app.upstream.received().await;
    assert_eq!(received.len(), 1);
    let forwarded: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(forwarded, request);
    assert_eq!(
        received[0].headers.get("authorization").unwrap().to_str().unwrap(),
        format!("Bearer {}", UPSTREAM_SECRET)
    );
    assert!(received[0].headers.get("accept").map_or(true, |v| v != "text/event-stream"));
}

#[tokio::test]
async fn test_divergent_vendor_body_is_normalized() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_success(UpstreamTestData::divergent_completion("wrapped answer"))
        .await;

    let response = app.chat(&chat_body(DIVERGENT_MODEL, "Hello", false)).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["model"], DIVERGENT_MODEL);
    assert!(body["created"].is_i64());
    assert_eq!(body["choices"][0]["index"], 0);
    assert_eq!(
        body["choices"][0]["message"],
        json!({"role": "assistant", "content": "wrapped answer"})
    );
    assert_eq!(body["choices"][0]["finish_reason"], "stop");

    let events = app.wait_for_events(&thread_id_of(&response), 2).await;
    assert_eq!(events[1].message_text.as_deref(), Some("wrapped answer"));
}

#[tokio::test]
async fn test_chat_alias_path_is_served() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("alias"))
        .await;

    let response = app
        .server
        .post("/chat/completions")
        .add_header(header::AUTHORIZATION, bearer(PERSONAL_KEY))
        .json(&chat_body(MODEL, "Hello", false))
        .await;

    response.assert_status_ok();
    assert_eq!(app.upstream.request_count().await, 1);
}

#[tokio::test]
async fn test_hash_marker_base_url_is_used_verbatim() {
    let app = TestApp::spawn_with(TestOptions {
        base_url_suffix: "/custom/endpoint#",
        ..Default::default()
    })
    .await;
    app.upstream
        .mock_chat_success_at("/custom/endpoint", UpstreamTestData::completion("custom"))
        .await;

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status_ok();
    let received = app.upstream.received().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].url.path(), "/custom/endpoint");
}

#[tokio::test]
async fn test_trailing_slash_base_url_appends_chat_completions() {
    let app = TestApp::spawn_with(TestOptions {
        base_url_suffix: "/api/",
        ..Default::default()
    })
    .await;
    app.upstream
        .mock_chat_success_at("/api/chat/completions", UpstreamTestData::completion("slash"))
        .await;

    app.chat(&chat_body(MODEL, "Hello", false))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_missing_bearer_is_rejected() {
    let app = TestApp::spawn().await;

    let response = app
        .server
        .post("/v1/chat/completions")
        .json(&chat_body(MODEL, "Hello", false))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "MISSING_CREDENTIAL");
    assert_eq!(app.upstream.request_count().await, 0);
}

#[tokio::test]
async fn test_unknown_key_is_unauthorized_and_records_nothing() {
    let app = TestApp::spawn().await;

    let response = app
        .chat_with_key("pk-nobody", &chat_body(MODEL, "Hello", false))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(app.total_stats().await.total_conversations, 0);
    assert_eq!(app.upstream.request_count().await, 0);
}

#[tokio::test]
async fn test_unbound_model_is_unauthorized() {
    let app = TestApp::spawn().await;

    let response = app.chat(&chat_body("claude-unbound", "Hello", false)).await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(app.total_stats().await.total_conversations, 0);
}

#[tokio::test]
async fn test_missing_model_is_bad_request() {
    let app = TestApp::spawn().await;

    let response = app
        .chat(&json!({"messages": [{"role": "user", "content": "Hello"}]}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let app = TestApp::spawn().await;

    let response = app
        .server
        .post("/v1/chat/completions")
        .add_header(header::AUTHORIZATION, bearer(PERSONAL_KEY))
        .text("{not json")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limit_is_passed_through_without_retry() {
    let app = TestApp::spawn().await;
    let error_body = json!({"error": {"message": "Rate limit reached", "type": "rate_limit"}});
    app.upstream
        .mock_chat_error(
            429,
            error_body.clone(),
            &[
                ("retry-after", "7"),
                ("x-ratelimit-remaining-requests", "0"),
                ("x-internal-trace", "do-not-forward"),
            ],
        )
        .await;

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json();
    assert_eq!(body, error_body);
    assert_eq!(response.headers()["retry-after"], "7");
    assert_eq!(response.headers()["x-ratelimit-remaining-requests"], "0");
    assert_eq!(response.headers()["content-type"], "application/json");
    assert!(response.headers().get("x-internal-trace").is_none());
    assert_eq!(app.upstream.request_count().await, 1);
}

#[tokio::test]
async fn test_prompt_is_recorded_even_when_upstream_fails() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_error(500, json!({"error": "boom"}), &[])
        .await;

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let totals = app.total_stats().await;
    assert_eq!(totals.total_conversations, 1);
    assert!(totals.prompt_tokens > 0);
    assert_eq!(totals.completion_tokens, 0);
}

#[tokio::test]
async fn test_timeouts_are_retried_until_success() {
    let app = TestApp::spawn_with(TestOptions {
        configure: |config| {
            config.upstream_timeout = Duration::from_millis(200);
            config.retry_delay = Duration::from_millis(10);
            config.max_attempts = 3;
        },
        ..Default::default()
    })
    .await;
    app.upstream
        .mock_chat_slow_then_success(
            Duration::from_secs(2),
            2,
            UpstreamTestData::completion("third time lucky"),
        )
        .await;

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["choices"][0]["message"]["content"], "third time lucky");
    assert_eq!(app.upstream.request_count().await, 3);
}

#[tokio::test]
async fn test_exhausted_timeouts_report_attempts() {
    let app = TestApp::spawn_with(TestOptions {
        configure: |config| {
            config.upstream_timeout = Duration::from_millis(100);
            config.retry_delay = Duration::from_millis(10);
            config.max_attempts = 2;
        },
        ..Default::default()
    })
    .await;
    app.upstream.mock_chat_always_slow(Duration::from_secs(2)).await;

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status(StatusCode::GATEWAY_TIMEOUT);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "UPSTREAM_TIMEOUT");
    assert_eq!(body["error"]["attempts"], 2);
    assert_eq!(app.upstream.request_count().await, 2);
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let mut config = nexus_relay::Config::for_testing();
    config.retry_delay = Duration::from_millis(1);
    let app = TestApp::spawn_with_config(config).await;

    // Point the provider at a port nothing listens on
    let closed = NewProvider {
        name: PROVIDER_NAME.to_string(),
        base_url: "http://127.0.0.1:9".to_string(),
        upstream_secret: UPSTREAM_SECRET.to_string(),
        personalized_key: PERSONAL_KEY.to_string(),
        description: "closed port".to_string(),
    };
    app.store
        .update_provider(app.provider_id, &closed)
        .await
        .unwrap();

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "UPSTREAM_UNREACHABLE");
}

#[tokio::test]
async fn test_remote_tokenizer_counts_are_recorded() {
    let tokenizer = MockTokenizer::start().await;
    tokenizer.mock_fixed_count(42).await;

    let mut config = nexus_relay::Config::for_testing();
    config.tokenizer_api_url = Some(tokenizer.endpoint());
    config.tokenizer_api_key = Some("tok-key".to_string());
    let app = TestApp::spawn_with_config(config).await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("counted"))
        .await;

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status_ok();
    let events = app.wait_for_events(&thread_id_of(&response), 2).await;
    assert_eq!(events[0].tokens, 42);
    assert_eq!(events[1].tokens, 42);
}

#[tokio::test]
async fn test_failing_tokenizer_falls_back_to_estimate() {
    let tokenizer = MockTokenizer::start().await;
    tokenizer.mock_failure().await;

    let mut config = nexus_relay::Config::for_testing();
    config.tokenizer_api_url = Some(tokenizer.endpoint());
    let app = TestApp::spawn_with_config(config).await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("abcdefgh"))
        .await;

    let response = app.chat(&chat_body(MODEL, "Hello", false)).await;

    response.assert_status_ok();
    let events = app.wait_for_events(&thread_id_of(&response), 2).await;
    assert_eq!(events[1].tokens, nexus_relay::tokens::estimate_tokens("abcdefgh"));
}
