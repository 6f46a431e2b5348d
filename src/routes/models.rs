//! Models endpoint
//!
//! Lists every model bound to any provider, in OpenAI list shape.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::{error::AppResult, store::BoundModel, AppState};

/// Model information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Models list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<Model>,
}

/// First binding wins when several providers expose the same model name
pub fn build_model_list(bound: Vec<BoundModel>, created: i64) -> ModelsResponse {
    let mut seen = HashSet::new();
    let data = bound
        .into_iter()
        .filter(|m| seen.insert(m.model_name.clone()))
        .map(|m| Model {
            id: m.model_name,
            object: "model".to_string(),
            created,
            owned_by: m.provider_name,
        })
        .collect();

    ModelsResponse {
        object: "list".to_string(),
        data,
    }
}

/// List available models. No credential required.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
) -> AppResult<(StatusCode, Json<ModelsResponse>)> {
    let bound = state.providers.list_bound_models().await?;
    let response = build_model_list(bound, state.started_at.timestamp());
    Ok((StatusCode::OK, Json(response)))
}
