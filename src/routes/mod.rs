//! HTTP routes for the relay
//!
//! This module defines all HTTP endpoints exposed by the gateway.

pub mod chat;
pub mod health;
pub mod metrics;
pub mod models;
pub mod stats;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{middleware::auth::bearer_middleware, AppState};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    // Relay routes need a bearer credential; the key itself is checked
    // against the requested model by the relay engine
    let relay_routes = Router::new()
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/chat/completions", post(chat::chat_completions))
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn(bearer_middleware));

    let public_routes = Router::new()
        .route("/v1/models", get(models::list_models))
        .route("/models", get(models::list_models))
        .route("/stats/conversation/:conversation_id", get(stats::conversation_stats))
        .route("/stats/total", get(stats::total_stats))
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::prometheus_metrics));

    Router::new()
        .merge(public_routes)
        .merge(relay_routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
