//! Conversation correlation
//!
//! Callers rarely send a session identifier, so a thread is recovered from
//! the last user message: a request whose message equals (or starts like) a
//! recently recorded prompt is taken to continue that prompt's thread.
//! This is a best-effort heuristic. Identical short prompts from unrelated
//! callers land in the same thread.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::EventStore;

/// Number of leading characters compared by the fallback prefix match
pub const PREFIX_CHARS: usize = 20;

/// Mint a fresh thread id
pub fn mint_thread_id() -> String {
    Uuid::new_v4().to_string()
}

/// Maps a last user message to a recent thread
pub struct ConversationCorrelator {
    events: Arc<dyn EventStore>,
    window: Duration,
}

impl ConversationCorrelator {
    pub fn new(events: Arc<dyn EventStore>, window: Duration) -> Self {
        Self { events, window }
    }

    /// Find the thread a message most likely belongs to.
    ///
    /// Exact match first, then the first [`PREFIX_CHARS`] characters when the
    /// message is longer than that. Only prompts newer than `now - window`
    /// are considered, newest first. Store errors yield `None`.
    pub async fn correlate(&self, text: &str, now: DateTime<Utc>) -> Option<String> {
        if text.is_empty() {
            return None;
        }

        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let since_ms = now.timestamp_millis().saturating_sub(window_ms);

        match self.events.latest_thread_exact(text, since_ms).await {
            Ok(Some(thread)) => {
                debug!(thread_id = %thread, "Correlated by exact message");
                return Some(thread);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Exact correlation lookup failed");
                return None;
            }
        }

        if text.chars().count() <= PREFIX_CHARS {
            return None;
        }

        let prefix: String = text.chars().take(PREFIX_CHARS).collect();
        match self.events.latest_thread_prefix(&prefix, since_ms).await {
            Ok(found) => {
                if let Some(thread) = &found {
                    debug!(thread_id = %thread, "Correlated by message prefix");
                }
                found
            }
            Err(e) => {
                warn!(error = %e, "Prefix correlation lookup failed");
                None
            }
        }
    }
}
