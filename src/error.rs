//! Error types for the relay
//!
//! Every failure a caller can observe is an `AppError`. Upstream HTTP errors
//! are carried verbatim so the caller sees the provider's own status, body
//! and rate-limit headers.

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Invalid API key or the key has no access to the requested model")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Upstream timed out after {attempts} attempt(s)")]
    UpstreamTimeout { attempts: u32 },

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream returned status {status}")]
    UpstreamStatus {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short machine-readable kind, used for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MissingCredential | AppError::BadRequest(_) | AppError::Json(_) => {
                "bad_request"
            }
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound(_) => "not_found",
            AppError::UpstreamTimeout { .. } => "upstream_timeout",
            AppError::UpstreamUnreachable(_) => "upstream_unreachable",
            AppError::UpstreamStatus { .. } => "upstream_error",
            AppError::Database(_) | AppError::Internal(_) => "internal",
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, attempts) = match self {
            AppError::UpstreamStatus {
                status,
                headers,
                body,
            } => {
                let mut response = Response::new(Body::from(body));
                *response.status_mut() = status;
                response.headers_mut().extend(headers);
                return response;
            }
            AppError::MissingCredential => (
                StatusCode::UNAUTHORIZED,
                "MISSING_CREDENTIAL",
                "A valid 'Authorization: Bearer <key>' header is required".to_string(),
                None,
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                AppError::Unauthorized.to_string(),
                None,
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::UpstreamTimeout { attempts } => (
                StatusCode::GATEWAY_TIMEOUT,
                "UPSTREAM_TIMEOUT",
                format!("Upstream timed out after {} attempt(s)", attempts),
                Some(attempts),
            ),
            AppError::UpstreamUnreachable(_) => (
                StatusCode::BAD_GATEWAY,
                "UPSTREAM_UNREACHABLE",
                "Upstream service unreachable".to_string(),
                None,
            ),
            AppError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_JSON",
                "Invalid JSON in request".to_string(),
                None,
            ),
            err @ (AppError::Database(_) | AppError::Internal(_)) => {
                error!(error = %err, "Internal error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                attempts,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
