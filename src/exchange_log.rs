//! Exchange log
//!
//! Appends one JSON line per relayed exchange under
//! `<dir>/YYYY/MM/DD/HH/messages_YYYYMMDD-HHMM.jsonl`, bucketed by UTC+8
//! wall-clock time. Writes run on their own task and never affect a relay.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderMap};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const LOG_OFFSET_SECS: i32 = 8 * 3600;

fn log_offset() -> FixedOffset {
    FixedOffset::east_opt(LOG_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// One relayed exchange as written to disk
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub headers: BTreeMap<String, String>,
    pub url: String,
    pub client_host: Option<String>,
    pub body: Value,
    pub prompt: String,
    pub completion: String,
    pub thread_id: String,
}

impl ExchangeRecord {
    /// Timestamped now in the log's timezone
    pub fn now(
        headers: &HeaderMap,
        url: impl Into<String>,
        client_host: Option<String>,
        body: Value,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().with_timezone(&log_offset()),
            headers: redact_headers(headers),
            url: url.into(),
            client_host,
            body,
            prompt: String::new(),
            completion: String::new(),
            thread_id: thread_id.into(),
        }
    }
}

/// Request headers with the caller's credential masked
pub fn redact_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let rendered = if *name == header::AUTHORIZATION {
                "<redacted>".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            (name.as_str().to_string(), rendered)
        })
        .collect()
}

/// File sink for exchange records; `dir = None` disables it
#[derive(Debug, Clone, Default)]
pub struct ExchangeLog {
    dir: Option<PathBuf>,
}

impl ExchangeLog {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Bucket file for a timestamp
    pub fn path_for(dir: &Path, at: &DateTime<FixedOffset>) -> PathBuf {
        dir.join(at.format("%Y").to_string())
            .join(at.format("%m").to_string())
            .join(at.format("%d").to_string())
            .join(at.format("%H").to_string())
            .join(format!("messages_{}.jsonl", at.format("%Y%m%d-%H%M")))
    }

    /// Append one record, returning the file it went to
    pub async fn write(&self, record: &ExchangeRecord) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };

        let path = Self::path_for(dir, &record.timestamp);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(Some(path))
    }

    /// Fire-and-forget write on a spawned task
    pub fn spawn_write(self: &Arc<Self>, record: ExchangeRecord) {
        if !self.is_enabled() {
            return;
        }
        let log = Arc::clone(self);
        tokio::spawn(async move {
            match log.write(&record).await {
                Ok(path) => debug!(path = ?path, thread_id = %record.thread_id, "Exchange logged"),
                Err(e) => warn!(error = %e, "Failed to write exchange log"),
            }
        });
    }
}
