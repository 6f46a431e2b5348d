//! Upstream that misbehaves part-way through a stream
//!
//! wiremock only serves complete bodies, so this is a bare axum server
//! that writes one chunk and then either goes quiet or drops the
//! connection.

use std::time::Duration;

use axum::{body::Body, http::header, response::Response, routing::post, Router};
use bytes::Bytes;
use serde_json::json;
use tokio::net::TcpListener;

use super::upstream::CHAT_PATH;

/// What happens after the first chunk
#[derive(Debug, Clone, Copy)]
pub enum AfterFirstChunk {
    /// Keep the connection open and send nothing more
    Stall,
    /// Tear the connection down mid-body
    Abort,
}

pub struct FaultyStreamUpstream {
    uri: String,
    handle: tokio::task::JoinHandle<()>,
}

impl FaultyStreamUpstream {
    /// Serve `first` as the only content delta, then misbehave
    pub async fn start(first: &'static str, after: AfterFirstChunk) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind faulty upstream");
        let addr = listener.local_addr().expect("Failed to read local addr");

        let app = Router::new().route(CHAT_PATH, post(move || stream_reply(first, after)));
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            uri: format!("http://{}", addr),
            handle,
        }
    }

    pub fn uri(&self) -> String {
        self.uri.clone()
    }
}

impl Drop for FaultyStreamUpstream {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn stream_reply(first: &'static str, after: AfterFirstChunk) -> Response {
    let chunk = json!({
        "id": "chatcmpl-faulty",
        "object": "chat.completion.chunk",
        "created": 1_700_000_000,
        "model": "gpt-4o-mini",
        "choices": [{"index": 0, "delta": {"content": first}, "finish_reason": null}]
    });
    let frame = Bytes::from(format!("data: {}\n\n", chunk));

    let body = async_stream::stream! {
        yield Ok::<Bytes, std::io::Error>(frame);
        // give the first chunk time to reach the client
        tokio::time::sleep(Duration::from_millis(50)).await;
        match after {
            AfterFirstChunk::Stall => futures::future::pending::<()>().await,
            AfterFirstChunk::Abort => {
                yield Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "upstream went away",
                ));
            }
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body))
        .expect("valid response")
}
