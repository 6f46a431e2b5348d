//! Completion accounting guard
//!
//! Owns everything needed to close out an exchange: the completion token
//! event, the exchange log line and the final metrics. It fires exactly once,
//! either through [`CompletionAccounting::finish`] or, when a caller goes
//! away mid-stream, from `Drop` on a spawned task.

use std::sync::Arc;

use tracing::warn;

use crate::exchange_log::{ExchangeLog, ExchangeRecord};
use crate::proxy::{RelayStage, RequestContext};
use crate::routes::metrics::record_request;
use crate::tokens::TokenAccountant;

struct Pending {
    accountant: Arc<TokenAccountant>,
    exchange_log: Arc<ExchangeLog>,
    record: ExchangeRecord,
    ctx: RequestContext,
    provider_id: i64,
    text: String,
}

impl Pending {
    async fn settle(self) -> Option<u64> {
        let Pending {
            accountant,
            exchange_log,
            mut record,
            ctx,
            provider_id,
            text,
        } = self;

        ctx.log_stage(RelayStage::AccountingCompletion);
        let tokens = accountant
            .account_completion(&record.thread_id, provider_id, &ctx.model, &text)
            .await;

        record.completion = text;
        exchange_log.spawn_write(record);

        record_request(
            "ok",
            &ctx.model,
            ctx.streaming,
            ctx.start_time.elapsed().as_secs_f64(),
        );
        ctx.log_request_complete(tokens);
        ctx.log_stage(RelayStage::Done);
        tokens
    }
}

/// Records the completion side of an exchange at most once
pub struct CompletionAccounting {
    pending: Option<Pending>,
}

impl CompletionAccounting {
    pub fn new(
        accountant: Arc<TokenAccountant>,
        exchange_log: Arc<ExchangeLog>,
        record: ExchangeRecord,
        ctx: RequestContext,
        provider_id: i64,
    ) -> Self {
        Self {
            pending: Some(Pending {
                accountant,
                exchange_log,
                record,
                ctx,
                provider_id,
                text: String::new(),
            }),
        }
    }

    /// Append generated text
    pub fn push_text(&mut self, text: &str) {
        if let Some(pending) = &mut self.pending {
            pending.text.push_str(text);
        }
    }

    /// Account the completion now. Runs on its own task so it completes even
    /// if the awaiting future is dropped.
    pub async fn finish(mut self) -> Option<u64> {
        let pending = self.pending.take()?;
        match tokio::spawn(pending.settle()).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Completion accounting task failed");
                None
            }
        }
    }
}

impl Drop for CompletionAccounting {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                pending.ctx.log_stage(RelayStage::Failed("caller_disconnected"));
                handle.spawn(pending.settle());
            }
            Err(_) => warn!(
                thread_id = %pending.record.thread_id,
                "No runtime available, completion accounting lost"
            ),
        }
    }
}
