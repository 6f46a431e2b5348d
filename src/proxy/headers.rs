//! Header handling for upstream calls
//!
//! Caller headers are never forwarded: each upstream request is built from
//! scratch with the provider's own secret. On the way back only the
//! content type and rate-limit hints survive.

use axum::http::header::{self, HeaderName};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::error::{AppError, AppResult};

/// Headers for a request to a provider
pub fn build_upstream_headers(upstream_secret: &str, streaming: bool) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    let auth = HeaderValue::from_str(&format!("Bearer {}", upstream_secret)).map_err(|_| {
        AppError::Internal(anyhow::anyhow!(
            "upstream secret contains characters not allowed in a header"
        ))
    })?;
    headers.insert(AUTHORIZATION, auth);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if streaming {
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    }

    Ok(headers)
}

/// Upstream response headers a caller needs to back off correctly
pub fn is_rate_limit_header(name: &HeaderName) -> bool {
    *name == header::RETRY_AFTER || name.as_str().starts_with("x-ratelimit-")
}

/// Keep `content-type`, `retry-after` and `x-ratelimit-*` from an upstream response
pub fn passthrough_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut kept = HeaderMap::new();
    for (name, value) in upstream {
        if *name == header::CONTENT_TYPE || is_rate_limit_header(name) {
            kept.append(name.clone(), value.clone());
        }
    }
    kept
}
