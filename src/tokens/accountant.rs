//! Token accountant
//!
//! Counts prompt and completion tokens and appends them to the event log.
//! Accounting never fails a relay: every storage error is logged and dropped.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::routes::metrics::record_tokens;
use crate::store::{Direction, EventStore, TokenEvent};

use super::counter::TokenCounter;

/// Token accountant shared by all relay operations
pub struct TokenAccountant {
    counter: TokenCounter,
    events: Arc<dyn EventStore>,
}

impl TokenAccountant {
    pub fn new(counter: TokenCounter, events: Arc<dyn EventStore>) -> Self {
        Self { counter, events }
    }

    pub async fn count_tokens(&self, text: &str) -> u64 {
        self.counter.count_tokens(text).await
    }

    /// Append one token event. Returns whether it was stored.
    pub async fn record_event(
        &self,
        thread_id: &str,
        provider_id: i64,
        model_name: &str,
        tokens: u64,
        direction: Direction,
        message_text: Option<&str>,
    ) -> bool {
        let event = TokenEvent {
            timestamp_ms: Utc::now().timestamp_millis(),
            thread_id: thread_id.to_string(),
            provider_id,
            model_name: model_name.to_string(),
            tokens,
            direction,
            message_text: message_text.map(str::to_string),
        };

        match self.events.append(&event).await {
            Ok(()) => {
                record_tokens(direction.as_str(), tokens, model_name);
                debug!(
                    thread_id = %thread_id,
                    provider_id = provider_id,
                    model = %model_name,
                    tokens = tokens,
                    direction = direction.as_str(),
                    "Recorded token event"
                );
                true
            }
            Err(e) => {
                warn!(
                    thread_id = %thread_id,
                    direction = direction.as_str(),
                    error = %e,
                    "Failed to record token event"
                );
                false
            }
        }
    }

    /// Count the prompt and record it. `correlation_text` is stored on the
    /// event so later requests can be matched to this thread.
    pub async fn account_prompt(
        &self,
        thread_id: &str,
        provider_id: i64,
        model_name: &str,
        prompt_text: &str,
        correlation_text: &str,
    ) -> u64 {
        let tokens = self.count_tokens(prompt_text).await;
        let message = (!correlation_text.is_empty()).then_some(correlation_text);
        self.record_event(
            thread_id,
            provider_id,
            model_name,
            tokens,
            Direction::Prompt,
            message,
        )
        .await;
        tokens
    }

    /// Count and record the completion side. Skipped when nothing was generated.
    pub async fn account_completion(
        &self,
        thread_id: &str,
        provider_id: i64,
        model_name: &str,
        completion_text: &str,
    ) -> Option<u64> {
        if completion_text.is_empty() {
            debug!(thread_id = %thread_id, "Empty completion, skipping accounting");
            return None;
        }
        let tokens = self.count_tokens(completion_text).await;
        self.record_event(
            thread_id,
            provider_id,
            model_name,
            tokens,
            Direction::Completion,
            Some(completion_text),
        )
        .await;
        Some(tokens)
    }
}
