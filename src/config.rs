//! Configuration management for the relay
//!
//! Configuration is loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// SQLite connection URL holding providers, models and token events
    pub database_url: String,

    /// How long a thread stays matchable by the conversation correlator
    pub correlation_window: Duration,

    /// Total upstream attempts for one non-streaming relay (first try included)
    pub max_attempts: u32,
    /// Fixed delay between upstream attempts
    pub retry_delay: Duration,
    /// Per-attempt upstream timeout
    pub upstream_timeout: Duration,
    /// Per-attempt upstream timeout for models matching `slow_model_patterns`
    pub slow_upstream_timeout: Duration,
    /// Regexes matched against the model name to select the slow timeout
    pub slow_model_patterns: Vec<String>,
    /// Regexes matched against the model name to flag divergent vendor envelopes
    pub divergent_model_patterns: Vec<String>,
    /// Outbound proxies rotated across upstream attempts (empty = direct)
    pub upstream_proxies: Vec<String>,

    /// Remote token counting endpoint (fallback estimator when unset)
    pub tokenizer_api_url: Option<String>,
    /// Bearer key for the token counting endpoint
    pub tokenizer_api_key: Option<String>,
    /// Model id sent to the token counting endpoint
    pub tokenizer_model_id: String,

    /// Directory for the exchange log sink (disabled when `None`)
    pub exchange_log_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("RELAY_PORT")
                .unwrap_or_else(|_| "5231".to_string())
                .parse()
                .context("Invalid RELAY_PORT")?,

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/config.db".to_string()),

            correlation_window: Duration::from_secs(
                env::var("RELAY_CORRELATION_WINDOW_MINUTES")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse::<u64>()
                    .context("Invalid RELAY_CORRELATION_WINDOW_MINUTES")?
                    * 60,
            ),

            max_attempts: env::var("RELAY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid RELAY_MAX_ATTEMPTS")?,
            retry_delay: Duration::from_millis(
                env::var("RELAY_RETRY_DELAY_MS")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()
                    .context("Invalid RELAY_RETRY_DELAY_MS")?,
            ),
            upstream_timeout: Duration::from_secs(
                env::var("RELAY_UPSTREAM_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("Invalid RELAY_UPSTREAM_TIMEOUT_SECS")?,
            ),
            slow_upstream_timeout: Duration::from_secs(
                env::var("RELAY_SLOW_UPSTREAM_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "180".to_string())
                    .parse()
                    .context("Invalid RELAY_SLOW_UPSTREAM_TIMEOUT_SECS")?,
            ),
            slow_model_patterns: env::var("RELAY_SLOW_MODEL_PATTERNS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|_| default_slow_model_patterns()),
            divergent_model_patterns: env::var("RELAY_DIVERGENT_MODEL_PATTERNS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|_| default_divergent_model_patterns()),
            upstream_proxies: env::var("RELAY_UPSTREAM_PROXIES")
                .map(|v| split_list(&v))
                .unwrap_or_default(),

            tokenizer_api_url: env::var("TOKENIZER_API_URL").ok().filter(|v| !v.is_empty()),
            tokenizer_api_key: env::var("TOKENIZER_API_KEY").ok().filter(|v| !v.is_empty()),
            tokenizer_model_id: env::var("TOKENIZER_MODEL_ID")
                .unwrap_or_else(|_| "doubao-pro-32k-240615".to_string()),

            exchange_log_dir: match env::var("RELAY_EXCHANGE_LOG_DIR") {
                Ok(v) if v.is_empty() => None,
                Ok(v) => Some(PathBuf::from(v)),
                Err(_) => Some(PathBuf::from("messages")),
            },
        })
    }

    /// Configuration suitable for tests: in-memory database, no external
    /// tokenizer, no exchange log, short retry delay.
    pub fn for_testing() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: "sqlite::memory:".to_string(),
            correlation_window: Duration::from_secs(30 * 60),
            max_attempts: 3,
            retry_delay: Duration::from_millis(10),
            upstream_timeout: Duration::from_secs(5),
            slow_upstream_timeout: Duration::from_secs(10),
            slow_model_patterns: default_slow_model_patterns(),
            divergent_model_patterns: default_divergent_model_patterns(),
            upstream_proxies: Vec::new(),
            tokenizer_api_url: None,
            tokenizer_api_key: None,
            tokenizer_model_id: "test-tokenizer".to_string(),
            exchange_log_dir: None,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_slow_model_patterns() -> Vec<String> {
    vec![
        r"^o1".to_string(),
        r"reasoner".to_string(),
        r"(?i)thinking".to_string(),
    ]
}

fn default_divergent_model_patterns() -> Vec<String> {
    vec![r"(?i)^ernie".to_string(), r"(?i)^qwen-long".to_string()]
}
