//! Chat completions endpoint
//!
//! OpenAI-compatible `POST /v1/chat/completions` (and `/chat/completions`).
//! The handler only gathers the HTTP pieces; the relay engine does the rest.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::Response,
    Extension,
};
use bytes::Bytes;

use crate::{
    error::AppError,
    middleware::auth::Credential,
    relay::RelayRequest,
    AppState,
};

/// Handle chat completion requests, streaming or not
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Extension(credential): Extension<Credential>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = RelayRequest {
        credential,
        headers,
        client_host: connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()),
        body,
    };

    state.relay.relay(request).await
}
