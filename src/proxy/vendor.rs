//! Per-model vendor traits selected by model-name patterns

use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::Config;

/// Compiled model-name patterns
#[derive(Debug, Clone)]
pub struct VendorProfile {
    divergent: Vec<Regex>,
    slow: Vec<Regex>,
    timeout: Duration,
    slow_timeout: Duration,
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).with_context(|| format!("invalid model pattern '{}'", p)))
        .collect()
}

impl VendorProfile {
    pub fn new(
        divergent: &[String],
        slow: &[String],
        timeout: Duration,
        slow_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            divergent: compile(divergent)?,
            slow: compile(slow)?,
            timeout,
            slow_timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.divergent_model_patterns,
            &config.slow_model_patterns,
            config.upstream_timeout,
            config.slow_upstream_timeout,
        )
    }

    /// Models whose non-streaming bodies are returned in normalized form
    pub fn is_divergent(&self, model: &str) -> bool {
        self.divergent.iter().any(|re| re.is_match(model))
    }

    pub fn is_slow(&self, model: &str) -> bool {
        self.slow.iter().any(|re| re.is_match(model))
    }

    /// Per-attempt upstream timeout for a model
    pub fn timeout_for(&self, model: &str) -> Duration {
        if self.is_slow(model) {
            self.slow_timeout
        } else {
            self.timeout
        }
    }
}
