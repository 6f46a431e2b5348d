//! Thread ids: explicit header, correlation and minting

use pretty_assertions::{assert_eq, assert_ne};
use serde_json::json;

use crate::common::{
    chat_body, constants::*, conversation_header, thread_id_of, TestApp, TestOptions,
};
use crate::mocks::UpstreamTestData;

#[tokio::test]
async fn test_explicit_conversation_id_is_honored_and_echoed() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("ok"))
        .await;

    let response = app
        .chat(&chat_body(MODEL, "Hello", false))
        .add_header(
            conversation_header(),
            "thread-from-client".parse().unwrap(),
        )
        .await;

    response.assert_status_ok();
    assert_eq!(thread_id_of(&response), "thread-from-client");
    assert_eq!(app.wait_for_events("thread-from-client", 2).await.len(), 2);
}

#[tokio::test]
async fn test_repeated_prompt_joins_existing_thread() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("answer"))
        .await;

    let first = app
        .chat(&chat_body(MODEL, "Summarize the quarterly report", false))
        .await;
    first.assert_status_ok();
    let second = app
        .chat(&chat_body(MODEL, "Summarize the quarterly report", false))
        .await;
    second.assert_status_ok();

    let thread_id = thread_id_of(&first);
    assert_eq!(thread_id_of(&second), thread_id);

    let stats = app.conversation_stats(&thread_id).await;
    assert_eq!(stats["rounds"], 4);
}

#[tokio::test]
async fn test_shared_long_prefix_joins_existing_thread() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("answer"))
        .await;

    let first = app
        .chat(&chat_body(MODEL, "Translate this paragraph into French: bonjour", false))
        .await;
    let second = app
        .chat(&chat_body(MODEL, "Translate this paragraph into French: au revoir", false))
        .await;

    assert_eq!(thread_id_of(&first), thread_id_of(&second));
}

#[tokio::test]
async fn test_unrelated_prompts_get_new_threads() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("answer"))
        .await;

    let first = app.chat(&chat_body(MODEL, "What is Rust?", false)).await;
    let second = app.chat(&chat_body(MODEL, "Plan a trip to Kyoto", false)).await;

    assert_ne!(thread_id_of(&first), thread_id_of(&second));
}

#[tokio::test]
async fn test_zero_window_never_correlates() {
    let app = TestApp::spawn_with(TestOptions {
        configure: |config| config.correlation_window = std::time::Duration::ZERO,
        ..Default::default()
    })
    .await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("answer"))
        .await;

    let first = app.chat(&chat_body(MODEL, "Same words twice", false)).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = app.chat(&chat_body(MODEL, "Same words twice", false)).await;

    assert_ne!(thread_id_of(&first), thread_id_of(&second));
}

#[tokio::test]
async fn test_multimodal_prompt_is_accounted_as_text() {
    let app = TestApp::spawn().await;
    app.upstream
        .mock_chat_success(UpstreamTestData::completion("a cat"))
        .await;

    let body = json!({
        "model": MODEL,
        "messages": [{
            "role": "user",
            "content": [
                {"type": "text", "text": "What is in this picture?"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
            ]
        }]
    });
    let response = app.chat(&body).await;

    response.assert_status_ok();
    let events = app.wait_for_events(&thread_id_of(&response), 2).await;
    assert_eq!(
        events[0].message_text.as_deref(),
        Some("What is in this picture?\n[attachment]")
    );
}
