//! Credential resolution
//!
//! Maps a caller's personalized key and requested model to the provider that
//! serves it.

use std::sync::Arc;

use tracing::debug;

use crate::error::AppResult;
use crate::middleware::auth::Credential;
use crate::store::{ProviderInfo, ProviderStore};

/// Resolves (credential, model) pairs against the provider tables
#[derive(Clone)]
pub struct CredentialResolver {
    providers: Arc<dyn ProviderStore>,
}

impl CredentialResolver {
    pub fn new(providers: Arc<dyn ProviderStore>) -> Self {
        Self { providers }
    }

    /// `Ok(None)` when the key is unknown or the provider does not bind the
    /// model. Both cases run the same single lookup.
    pub async fn resolve(
        &self,
        credential: &Credential,
        model: &str,
    ) -> AppResult<Option<ProviderInfo>> {
        let info = self
            .providers
            .find_binding(credential.expose(), model)
            .await?;

        debug!(
            credential = %credential.fingerprint(),
            model = %model,
            provider = ?info.as_ref().map(|p| p.provider_name.as_str()),
            "Credential resolved"
        );

        Ok(info)
    }
}
