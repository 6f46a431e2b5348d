//! Health check endpoint
//!
//! `/health` reports overall status plus a store round-trip.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

/// Health status enum
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Individual dependency check result
#[derive(Debug, Serialize)]
pub struct DependencyCheck {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dependency checks collection
#[derive(Debug, Serialize)]
pub struct DependencyChecks {
    pub database: DependencyCheck,
}

/// Full health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub checks: DependencyChecks,
}

async fn check_database(state: &AppState) -> DependencyCheck {
    let start = Instant::now();
    match state.events.ping().await {
        Ok(()) => DependencyCheck {
            status: HealthStatus::Healthy,
            latency_ms: start.elapsed().as_millis() as u64,
            error: None,
        },
        Err(e) => DependencyCheck {
            status: HealthStatus::Unhealthy,
            latency_ms: start.elapsed().as_millis() as u64,
            error: Some(e.to_string()),
        },
    }
}

/// Full health check endpoint
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = check_database(&state).await;
    let status = database.status.clone();

    let response = HealthResponse {
        status: status.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks: DependencyChecks { database },
    };

    let status_code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}
