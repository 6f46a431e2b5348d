//! Token counter implementation
//!
//! Asks a remote tokenization service for exact counts and falls back to a
//! deterministic byte-length estimate whenever that service is unavailable.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Request timeout for the counting service; counting must never stall a relay
const COUNT_TIMEOUT: Duration = Duration::from_secs(5);

/// Local estimate used whenever the remote count is unavailable:
/// `ceil(utf8_len / 4)`.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

#[derive(Debug, Serialize)]
struct CountRequest<'a> {
    model: &'a str,
    text: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    #[serde(default)]
    data: Vec<Tokenization>,
}

/// One entry of the counting service's `data` array
#[derive(Debug, Clone, Deserialize)]
pub struct Tokenization {
    pub total_tokens: u64,
    #[serde(default)]
    pub token_ids: Vec<u64>,
    #[serde(default)]
    pub offset_mapping: Vec<[u64; 2]>,
}

/// Token counter backed by a remote tokenization endpoint
#[derive(Clone)]
pub struct TokenCounter {
    client: reqwest::Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    model_id: String,
}

impl TokenCounter {
    /// Create a new token counter; `endpoint = None` always uses the estimate
    pub fn new(
        client: reqwest::Client,
        endpoint: Option<String>,
        api_key: Option<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            model_id: model_id.into(),
        }
    }

    /// Counter that never calls out
    pub fn offline() -> Self {
        Self::new(reqwest::Client::new(), None, None, "offline")
    }

    /// Count tokens in a text string
    pub async fn count_tokens(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        match self.tokenize(text).await {
            Some(info) => info.total_tokens,
            None => estimate_tokens(text),
        }
    }

    /// Full tokenization (ids and offsets) from the remote service
    ///
    /// Returns `None` on any failure; callers decide how to degrade.
    pub async fn tokenize(&self, text: &str) -> Option<Tokenization> {
        let endpoint = self.endpoint.as_deref()?;

        let mut request = self
            .client
            .post(endpoint)
            .timeout(COUNT_TIMEOUT)
            .json(&CountRequest {
                model: &self.model_id,
                text: [text],
            });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Token counting request failed, using estimate");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Token counting service returned an error, using estimate");
            return None;
        }

        match response.json::<CountResponse>().await {
            Ok(parsed) => {
                let first = parsed.data.into_iter().next();
                if first.is_none() {
                    warn!("Token counting response had no data, using estimate");
                }
                debug!(total_tokens = ?first.as_ref().map(|t| t.total_tokens), "Remote token count");
                first
            }
            Err(e) => {
                warn!(error = %e, "Malformed token counting response, using estimate");
                None
            }
        }
    }
}
