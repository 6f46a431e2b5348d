//! Nexus Relay - LLM chat completion gateway with per-conversation token accounting
//!
//! Callers reach many OpenAI-compatible providers through one endpoint using
//! a personalized key per provider. Responses are normalized to one wire
//! format and token usage is attributed to conversation threads.

pub mod config;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod exchange_log;
pub mod middleware;
pub mod normalize;
pub mod proxy;
pub mod relay;
pub mod routes;
pub mod store;
pub mod streaming;
pub mod tokens;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};

pub use crate::config::Config;
pub use crate::relay::RelayEngine;
pub use crate::store::{EventStore, ProviderStore, SqliteStore};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    /// Provider and model bindings
    pub providers: Arc<dyn ProviderStore>,
    /// Append-only token event log
    pub events: Arc<dyn EventStore>,
    pub relay: RelayEngine,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Open the configured database and wire up every service
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::connect(&config.database_url).await?);
        Self::with_store(config, store)
    }

    /// Build the state around an already opened store
    pub fn with_store(config: Config, store: Arc<SqliteStore>) -> Result<Self> {
        // Used for calls the relay makes on its own behalf (token counting)
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .timeout(Duration::from_secs(30))
            .build()?;

        let providers: Arc<dyn ProviderStore> = store.clone();
        let events: Arc<dyn EventStore> = store;
        let relay = RelayEngine::new(&config, providers.clone(), events.clone(), http_client)?;

        Ok(Self {
            config,
            providers,
            events,
            relay,
            start_time: Instant::now(),
            started_at: Utc::now(),
        })
    }
}
