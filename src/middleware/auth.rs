//! Authentication middleware
//!
//! Extracts the caller's personalized key from the `Authorization` header.
//! The key can only be checked once the requested model is known, so the
//! actual lookup happens in the relay engine; this layer just rejects
//! requests that carry no bearer credential at all.

use std::fmt;

use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::error::AppError;

/// Caller-facing credential taken from the bearer header
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short, stable identifier that is safe to log
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.fingerprint())
    }
}

/// Extract the bearer token from an Authorization header value
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Read the bearer credential from request headers
pub fn credential_from_headers(headers: &HeaderMap) -> Option<Credential> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
        .map(Credential::new)
}

/// First 12 hex chars of the SHA-256 of a secret
pub fn fingerprint(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(12);
    hex
}

/// Bearer credential middleware
///
/// Adds the `Credential` to request extensions, or fails with
/// `MissingCredential` before the body is read.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn bearer_middleware(mut request: Request, next: Next) -> Result<Response, AppError> {
    let credential = credential_from_headers(request.headers()).ok_or(AppError::MissingCredential)?;

    debug!(credential = %credential.fingerprint(), "Bearer credential present");

    request.extensions_mut().insert(credential);

    Ok(next.run(request).await)
}
