//! Upstream HTTP client
//!
//! One pooled `reqwest::Client` per configured outbound proxy (or a single
//! direct client). Each attempt takes the next client in rotation.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tracing::debug;

/// Chat-completions URL for a provider base URL.
///
/// - `https://h/x/` → `https://h/x/chat/completions`
/// - `https://h/x/chat#` → `https://h/x/chat` (marker stripped, used as is)
/// - `https://h` → `https://h/v1/chat/completions`
pub fn upstream_url(base_url: &str) -> String {
    if let Some(verbatim) = base_url.strip_suffix('#') {
        verbatim.to_string()
    } else if base_url.ends_with('/') {
        format!("{}chat/completions", base_url)
    } else {
        format!("{}/v1/chat/completions", base_url)
    }
}

/// Why a single upstream attempt produced no response
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("upstream attempt timed out")]
    Timeout,

    #[error("connection to upstream failed: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Request(String),
}

impl AttemptError {
    /// Only timeouts and connection failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Timeout | AttemptError::Connect(_))
    }

    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AttemptError::Timeout
        } else if e.is_connect() {
            AttemptError::Connect(e.to_string())
        } else {
            AttemptError::Request(e.to_string())
        }
    }
}

/// Outbound client pool with round-robin proxy selection
pub struct UpstreamClient {
    clients: Vec<(Option<String>, reqwest::Client)>,
    next: AtomicUsize,
}

fn build_client(proxy: Option<&str>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().pool_max_idle_per_host(100);
    if let Some(proxy) = proxy {
        builder = builder.proxy(
            reqwest::Proxy::all(proxy).with_context(|| format!("invalid upstream proxy '{}'", proxy))?,
        );
    }
    builder.build().context("failed to build upstream HTTP client")
}

impl UpstreamClient {
    pub fn new(proxies: &[String]) -> Result<Self> {
        let clients = if proxies.is_empty() {
            vec![(None, build_client(None)?)]
        } else {
            proxies
                .iter()
                .map(|p| Ok((Some(p.clone()), build_client(Some(p))?)))
                .collect::<Result<Vec<_>>>()?
        };
        Ok(Self {
            clients,
            next: AtomicUsize::new(0),
        })
    }

    pub fn proxy_count(&self) -> usize {
        self.clients.iter().filter(|(p, _)| p.is_some()).count()
    }

    /// Next client in rotation, with the proxy it goes through
    fn next_client(&self) -> (Option<&str>, &reqwest::Client) {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        let (proxy, client) = &self.clients[index];
        (proxy.as_deref(), client)
    }

    /// Build one POST for an attempt on the next client in rotation.
    /// `headers` come from [`build_upstream_headers`]; caller headers are
    /// never copied.
    ///
    /// [`build_upstream_headers`]: super::headers::build_upstream_headers
    pub fn request(&self, url: &str, headers: HeaderMap, body: Bytes) -> reqwest::RequestBuilder {
        let (proxy, client) = self.next_client();
        debug!(url = %url, proxy = ?proxy, "Prepared upstream request");
        client.post(url).headers(headers).body(body)
    }
}
