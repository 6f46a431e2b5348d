//! Persistence for providers, model bindings and token events
//!
//! The relay core only reads providers and bindings, and only appends token
//! events. Both concerns sit behind traits so the engine can be exercised
//! against any backing store; `SqliteStore` is the production one.

pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

pub use sqlite::SqliteStore;

/// Stored provider row
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub upstream_secret: String,
    pub personalized_key: String,
    pub description: String,
}

impl fmt::Debug for ProviderRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_url", &"<redacted>")
            .field("upstream_secret", &"<redacted>")
            .field("personalized_key", &"<redacted>")
            .field("description", &self.description)
            .finish()
    }
}

/// Fields for creating or replacing a provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProvider {
    pub name: String,
    pub base_url: String,
    pub upstream_secret: String,
    pub personalized_key: String,
    #[serde(default)]
    pub description: String,
}

/// A model name exposed by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBinding {
    pub id: i64,
    pub provider_id: i64,
    pub model_name: String,
    pub description: String,
}

/// Model listing entry joined with its provider's display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundModel {
    pub model_name: String,
    pub provider_name: String,
}

/// Immutable snapshot of everything the relay needs to reach one provider.
///
/// Captured once per request; no store handle is held across the upstream call.
#[derive(Clone)]
pub struct ProviderInfo {
    pub provider_id: i64,
    pub provider_name: String,
    pub base_url: String,
    pub upstream_secret: String,
    pub models: Vec<String>,
}

impl ProviderInfo {
    pub fn allows(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

impl fmt::Debug for ProviderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderInfo")
            .field("provider_id", &self.provider_id)
            .field("provider_name", &self.provider_name)
            .field("base_url", &"<redacted>")
            .field("upstream_secret", &"<redacted>")
            .field("models", &self.models)
            .finish()
    }
}

/// Which side of an exchange a token event accounts for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Prompt,
    Completion,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Prompt => "prompt",
            Direction::Completion => "completion",
        }
    }

    /// Chat role shown in the conversation message log
    pub fn role(&self) -> &'static str {
        match self {
            Direction::Prompt => "user",
            Direction::Completion => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "prompt" => Some(Direction::Prompt),
            "completion" => Some(Direction::Completion),
            _ => None,
        }
    }
}

/// One append-only accounting record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    /// Unix milliseconds
    pub timestamp_ms: i64,
    pub thread_id: String,
    pub provider_id: i64,
    pub model_name: String,
    pub tokens: u64,
    pub direction: Direction,
    pub message_text: Option<String>,
}

/// Entry in a conversation's message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationMessage {
    pub timestamp_ms: i64,
    pub role: String,
    pub content: String,
    pub tokens_count: u64,
}

/// Aggregated usage for one thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    pub conversation_id: String,
    pub rounds: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub messages: Vec<ConversationMessage>,
}

/// Aggregated usage across all threads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TotalStats {
    pub total_conversations: u64,
    pub total_rounds: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Admin store as seen by the relay: read-mostly provider and model tables
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Provider reachable with `personalized_key` that binds `model_name`
    async fn find_binding(
        &self,
        personalized_key: &str,
        model_name: &str,
    ) -> AppResult<Option<ProviderInfo>>;

    async fn get_provider(&self, id: i64) -> AppResult<Option<ProviderRecord>>;

    async fn list_providers(&self) -> AppResult<Vec<ProviderRecord>>;

    async fn list_models(&self, provider_id: i64) -> AppResult<Vec<ModelBinding>>;

    /// Every bound model across all providers
    async fn list_bound_models(&self) -> AppResult<Vec<BoundModel>>;

    async fn create_provider(&self, provider: &NewProvider) -> AppResult<i64>;

    async fn update_provider(&self, id: i64, provider: &NewProvider) -> AppResult<()>;

    /// Removes the provider and all of its model bindings
    async fn delete_provider(&self, id: i64) -> AppResult<()>;

    async fn add_model(
        &self,
        provider_id: i64,
        model_name: &str,
        description: &str,
    ) -> AppResult<i64>;

    async fn update_model(
        &self,
        model_id: i64,
        provider_id: i64,
        model_name: &str,
        description: &str,
    ) -> AppResult<()>;

    async fn delete_model(&self, model_id: i64) -> AppResult<()>;
}

/// Append-only token event log plus the reads built on it
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, event: &TokenEvent) -> AppResult<()>;

    /// Newest thread whose prompt text equals `text`, newer than `since_ms`
    async fn latest_thread_exact(&self, text: &str, since_ms: i64) -> AppResult<Option<String>>;

    /// Newest thread whose prompt text starts with `prefix`, newer than `since_ms`
    async fn latest_thread_prefix(
        &self,
        prefix: &str,
        since_ms: i64,
    ) -> AppResult<Option<String>>;

    async fn events_for_thread(&self, thread_id: &str) -> AppResult<Vec<TokenEvent>>;

    async fn conversation_stats(&self, thread_id: &str) -> AppResult<ConversationStats>;

    async fn total_stats(&self) -> AppResult<TotalStats>;

    /// Cheap liveness check
    async fn ping(&self) -> AppResult<()>;
}
