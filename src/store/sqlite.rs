//! SQLite-backed store
//!
//! Holds the provider and model tables owned by the admin surface and the
//! append-only `token_events` table written by the relay. SQLite serializes
//! writers, which gives the event log its single-writer discipline.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

use super::{
    BoundModel, ConversationMessage, ConversationStats, Direction, EventStore, ModelBinding,
    NewProvider, ProviderInfo, ProviderRecord, ProviderStore, TokenEvent, TotalStats,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS service_providers (\
     id INTEGER PRIMARY KEY AUTOINCREMENT,\
     name TEXT NOT NULL,\
     server_url TEXT NOT NULL,\
     server_key TEXT NOT NULL,\
     personalized_key TEXT NOT NULL,\
     description TEXT NOT NULL DEFAULT ''\
     )",
    "CREATE TABLE IF NOT EXISTS provider_models (\
     id INTEGER PRIMARY KEY AUTOINCREMENT,\
     provider_id INTEGER NOT NULL REFERENCES service_providers (id),\
     model_name TEXT NOT NULL,\
     description TEXT NOT NULL DEFAULT '',\
     UNIQUE (provider_id, model_name)\
     )",
    "CREATE INDEX IF NOT EXISTS idx_service_providers_key ON service_providers (personalized_key)",
    "CREATE TABLE IF NOT EXISTS token_events (\
     id INTEGER PRIMARY KEY AUTOINCREMENT,\
     timestamp_ms INTEGER NOT NULL,\
     thread_id TEXT NOT NULL,\
     provider_id INTEGER NOT NULL,\
     model_name TEXT NOT NULL,\
     tokens INTEGER NOT NULL,\
     direction TEXT NOT NULL CHECK (direction IN ('prompt', 'completion')),\
     message_text TEXT\
     )",
    "CREATE INDEX IF NOT EXISTS idx_token_events_thread ON token_events (thread_id)",
    "CREATE INDEX IF NOT EXISTS idx_token_events_recent ON token_events (direction, timestamp_ms)",
];

#[derive(FromRow)]
struct ProviderRow {
    id: i64,
    name: String,
    server_url: String,
    server_key: String,
    personalized_key: String,
    description: String,
}

impl From<ProviderRow> for ProviderRecord {
    fn from(row: ProviderRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            base_url: row.server_url,
            upstream_secret: row.server_key,
            personalized_key: row.personalized_key,
            description: row.description,
        }
    }
}

#[derive(FromRow)]
struct EventRow {
    timestamp_ms: i64,
    thread_id: String,
    provider_id: i64,
    model_name: String,
    tokens: i64,
    direction: String,
    message_text: Option<String>,
}

impl TryFrom<EventRow> for TokenEvent {
    type Error = AppError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let direction = Direction::parse(&row.direction).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "unknown token event direction '{}'",
                row.direction
            ))
        })?;
        Ok(Self {
            timestamp_ms: row.timestamp_ms,
            thread_id: row.thread_id,
            provider_id: row.provider_id,
            model_name: row.model_name,
            tokens: row.tokens.max(0) as u64,
            direction,
            message_text: row.message_text,
        })
    }
}

fn ensure_parent_dir(url: &str) -> AppResult<()> {
    let url = url.trim();
    if !url.starts_with("sqlite:") || url.contains(":memory:") || url.contains("mode=memory") {
        return Ok(());
    }
    let path_part = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path_part = path_part.split('?').next().unwrap_or("");
    if path_part.is_empty() {
        return Ok(());
    }
    if let Some(parent) = Path::new(path_part).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// SQLite implementation of both store traits
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Connect (creating the database file if needed) and apply the schema
    pub async fn connect(url: &str) -> AppResult<Self> {
        ensure_parent_dir(url)?;
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to `:memory:` is a separate database, so memory
        // stores get exactly one connection that is never recycled.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool };
        store.migrate().await?;
        info!(in_memory = in_memory, "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderStore for SqliteStore {
    async fn find_binding(
        &self,
        personalized_key: &str,
        model_name: &str,
    ) -> AppResult<Option<ProviderInfo>> {
        let mut tx = self.pool.begin().await?;

        let provider = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT sp.id, sp.name, sp.server_url, sp.server_key \
             FROM service_providers sp \
             JOIN provider_models pm ON sp.id = pm.provider_id \
             WHERE sp.personalized_key = ? AND pm.model_name = ? \
             ORDER BY sp.id LIMIT 1",
        )
        .bind(personalized_key)
        .bind(model_name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((provider_id, provider_name, base_url, upstream_secret)) = provider else {
            tx.commit().await?;
            return Ok(None);
        };

        let models = sqlx::query_scalar::<_, String>(
            "SELECT model_name FROM provider_models WHERE provider_id = ? ORDER BY id",
        )
        .bind(provider_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(Some(ProviderInfo {
            provider_id,
            provider_name,
            base_url,
            upstream_secret,
            models,
        }))
    }

    async fn get_provider(&self, id: i64) -> AppResult<Option<ProviderRecord>> {
        let row = sqlx::query_as::<_, ProviderRow>(
            "SELECT id, name, server_url, server_key, personalized_key, description \
             FROM service_providers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProviderRecord::from))
    }

    async fn list_providers(&self) -> AppResult<Vec<ProviderRecord>> {
        let rows = sqlx::query_as::<_, ProviderRow>(
            "SELECT id, name, server_url, server_key, personalized_key, description \
             FROM service_providers ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ProviderRecord::from).collect())
    }

    async fn list_models(&self, provider_id: i64) -> AppResult<Vec<ModelBinding>> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String)>(
            "SELECT id, provider_id, model_name, description \
             FROM provider_models WHERE provider_id = ? ORDER BY id",
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, provider_id, model_name, description)| ModelBinding {
                id,
                provider_id,
                model_name,
                description,
            })
            .collect())
    }

    async fn list_bound_models(&self) -> AppResult<Vec<BoundModel>> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT pm.model_name, sp.name \
             FROM provider_models pm \
             JOIN service_providers sp ON sp.id = pm.provider_id \
             ORDER BY pm.id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(model_name, provider_name)| BoundModel {
                model_name,
                provider_name,
            })
            .collect())
    }

    async fn create_provider(&self, provider: &NewProvider) -> AppResult<i64> {
        let result = sqlx::query(
            "INSERT INTO service_providers \
             (name, server_url, server_key, personalized_key, description) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&provider.name)
        .bind(&provider.base_url)
        .bind(&provider.upstream_secret)
        .bind(&provider.personalized_key)
        .bind(&provider.description)
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();
        debug!(provider_id = id, name = %provider.name, "Provider created");
        Ok(id)
    }

    async fn update_provider(&self, id: i64, provider: &NewProvider) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE service_providers \
             SET name = ?, server_url = ?, server_key = ?, personalized_key = ?, description = ? \
             WHERE id = ?",
        )
        .bind(&provider.name)
        .bind(&provider.base_url)
        .bind(&provider.upstream_secret)
        .bind(&provider.personalized_key)
        .bind(&provider.description)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("provider {}", id)));
        }
        Ok(())
    }

    async fn delete_provider(&self, id: i64) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM provider_models WHERE provider_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM service_providers WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(AppError::NotFound(format!("provider {}", id)));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn add_model(
        &self,
        provider_id: i64,
        model_name: &str,
        description: &str,
    ) -> AppResult<i64> {
        let result = sqlx::query(
            "INSERT INTO provider_models (provider_id, model_name, description) VALUES (?, ?, ?)",
        )
        .bind(provider_id)
        .bind(model_name)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::BadRequest(
                format!("provider {} already binds model '{}'", provider_id, model_name),
            ),
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                AppError::NotFound(format!("provider {}", provider_id))
            }
            other => AppError::Database(other),
        })?;
        Ok(result.last_insert_rowid())
    }

    async fn update_model(
        &self,
        model_id: i64,
        provider_id: i64,
        model_name: &str,
        description: &str,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE provider_models SET provider_id = ?, model_name = ?, description = ? \
             WHERE id = ?",
        )
        .bind(provider_id)
        .bind(model_name)
        .bind(description)
        .bind(model_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::BadRequest(
                format!("provider {} already binds model '{}'", provider_id, model_name),
            ),
            other => AppError::Database(other),
        })?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("model {}", model_id)));
        }
        Ok(())
    }

    async fn delete_model(&self, model_id: i64) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM provider_models WHERE id = ?")
            .bind(model_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("model {}", model_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    async fn append(&self, event: &TokenEvent) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO token_events \
             (timestamp_ms, thread_id, provider_id, model_name, tokens, direction, message_text) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.timestamp_ms)
        .bind(&event.thread_id)
        .bind(event.provider_id)
        .bind(&event.model_name)
        .bind(i64::try_from(event.tokens).unwrap_or(i64::MAX))
        .bind(event.direction.as_str())
        .bind(event.message_text.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_thread_exact(&self, text: &str, since_ms: i64) -> AppResult<Option<String>> {
        let thread = sqlx::query_scalar::<_, String>(
            "SELECT thread_id FROM token_events \
             WHERE direction = 'prompt' AND timestamp_ms > ? AND message_text = ? \
             ORDER BY timestamp_ms DESC, id DESC LIMIT 1",
        )
        .bind(since_ms)
        .bind(text)
        .fetch_optional(&self.pool)
        .await?;
        Ok(thread)
    }

    async fn latest_thread_prefix(
        &self,
        prefix: &str,
        since_ms: i64,
    ) -> AppResult<Option<String>> {
        // substr() counts characters, so no LIKE escaping is needed
        let thread = sqlx::query_scalar::<_, String>(
            "SELECT thread_id FROM token_events \
             WHERE direction = 'prompt' AND timestamp_ms > ? \
             AND substr(message_text, 1, ?) = ? \
             ORDER BY timestamp_ms DESC, id DESC LIMIT 1",
        )
        .bind(since_ms)
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_optional(&self.pool)
        .await?;
        Ok(thread)
    }

    async fn events_for_thread(&self, thread_id: &str) -> AppResult<Vec<TokenEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT timestamp_ms, thread_id, provider_id, model_name, tokens, direction, message_text \
             FROM token_events WHERE thread_id = ? ORDER BY timestamp_ms ASC, id ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TokenEvent::try_from).collect()
    }

    async fn conversation_stats(&self, thread_id: &str) -> AppResult<ConversationStats> {
        let events = self.events_for_thread(thread_id).await?;

        let mut stats = ConversationStats {
            conversation_id: thread_id.to_string(),
            rounds: events.len() as u64,
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            messages: Vec::new(),
        };
        for event in events {
            match event.direction {
                Direction::Prompt => stats.prompt_tokens += event.tokens,
                Direction::Completion => stats.completion_tokens += event.tokens,
            }
            stats.total_tokens += event.tokens;
            if let Some(content) = event.message_text {
                stats.messages.push(ConversationMessage {
                    timestamp_ms: event.timestamp_ms,
                    role: event.direction.role().to_string(),
                    content,
                    tokens_count: event.tokens,
                });
            }
        }
        Ok(stats)
    }

    async fn total_stats(&self) -> AppResult<TotalStats> {
        let (conversations, events, prompt, completion) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                "SELECT \
                 COUNT(DISTINCT thread_id), \
                 COUNT(*), \
                 COALESCE(SUM(CASE WHEN direction = 'prompt' THEN tokens ELSE 0 END), 0), \
                 COALESCE(SUM(CASE WHEN direction = 'completion' THEN tokens ELSE 0 END), 0) \
                 FROM token_events",
            )
            .fetch_one(&self.pool)
            .await?;

        let prompt_tokens = prompt.max(0) as u64;
        let completion_tokens = completion.max(0) as u64;
        Ok(TotalStats {
            total_conversations: conversations.max(0) as u64,
            // one round is a prompt plus its completion
            total_rounds: events.max(0) as u64 / 2,
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        })
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
