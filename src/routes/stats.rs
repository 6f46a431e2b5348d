//! Usage statistics endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::warn;

use crate::{
    error::AppResult,
    store::{ConversationStats, TotalStats},
    AppState,
};

/// Token usage and message log for one thread
pub async fn conversation_stats(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> AppResult<Json<ConversationStats>> {
    let stats = state.events.conversation_stats(&conversation_id).await?;
    Ok(Json(stats))
}

/// Usage across all threads; an unreadable store reports zeros
pub async fn total_stats(State(state): State<Arc<AppState>>) -> Json<TotalStats> {
    match state.events.total_stats().await {
        Ok(stats) => Json(stats),
        Err(e) => {
            warn!(error = %e, "Failed to compute total stats");
            Json(TotalStats::default())
        }
    }
}
