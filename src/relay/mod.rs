//! Relay engine
//!
//! Drives one chat completion exchange through its stages:
//! authenticate, correlate the thread, account the prompt, call the
//! upstream (with retries), deliver the normalized reply and account the
//! completion. See [`RelayStage`] for the logged stage names.

pub mod completion;
pub mod request;

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, Instrument};

use crate::config::Config;
use crate::conversation::{mint_thread_id, ConversationCorrelator};
use crate::credentials::CredentialResolver;
use crate::error::{AppError, AppResult};
use crate::exchange_log::{ExchangeLog, ExchangeRecord};
use crate::middleware::auth::Credential;
use crate::normalize::{completion_text, normalize_body, EnvelopeDefaults, StreamNormalizer};
use crate::proxy::headers::{build_upstream_headers, passthrough_headers};
use crate::proxy::{
    upstream_url, AttemptError, RelayStage, RequestContext, RetryPolicy, UpstreamClient,
    VendorProfile,
};
use crate::routes::metrics::{record_request, record_upstream_attempt};
use crate::store::{EventStore, ProviderInfo, ProviderStore};
use crate::tokens::{TokenAccountant, TokenCounter};

pub use completion::CompletionAccounting;
pub use request::{ChatCompletionRequest, ChatMessage};

/// Header carrying an explicit thread id, in and out
pub const CONVERSATION_HEADER: &str = "x-conversation-id";

/// One inbound relay, as handed over by the HTTP layer
#[derive(Debug)]
pub struct RelayRequest {
    pub credential: Credential,
    pub headers: HeaderMap,
    pub client_host: Option<String>,
    pub body: Bytes,
}

/// Everything settled before the upstream is called
struct Prepared {
    request: ChatCompletionRequest,
    provider: ProviderInfo,
    thread_id: String,
    url: String,
    upstream_headers: HeaderMap,
    record: ExchangeRecord,
}

pub struct RelayEngine {
    resolver: CredentialResolver,
    correlator: ConversationCorrelator,
    accountant: Arc<TokenAccountant>,
    upstream: UpstreamClient,
    vendors: VendorProfile,
    retry: RetryPolicy,
    exchange_log: Arc<ExchangeLog>,
}

impl RelayEngine {
    pub fn new(
        config: &Config,
        providers: Arc<dyn ProviderStore>,
        events: Arc<dyn EventStore>,
        http_client: reqwest::Client,
    ) -> anyhow::Result<Self> {
        let counter = TokenCounter::new(
            http_client,
            config.tokenizer_api_url.clone(),
            config.tokenizer_api_key.clone(),
            config.tokenizer_model_id.clone(),
        );

        Ok(Self {
            resolver: CredentialResolver::new(providers),
            correlator: ConversationCorrelator::new(events.clone(), config.correlation_window),
            accountant: Arc::new(TokenAccountant::new(counter, events)),
            upstream: UpstreamClient::new(&config.upstream_proxies)?,
            vendors: VendorProfile::from_config(config)?,
            retry: RetryPolicy::new(config.max_attempts, config.retry_delay),
            exchange_log: Arc::new(ExchangeLog::new(config.exchange_log_dir.clone())),
        })
    }

    /// Relay one chat completion request
    pub async fn relay(&self, request: RelayRequest) -> AppResult<Response> {
        let chat = ChatCompletionRequest::parse(request.body.clone())?;
        let mut ctx = RequestContext::new(chat.model.clone(), chat.stream);
        let span = ctx.create_span();

        let result = async {
            let prepared = self.prepare(&mut ctx, request, chat).await?;
            if prepared.request.stream {
                self.relay_streaming(&ctx, prepared).await
            } else {
                self.relay_buffered(&ctx, prepared).await
            }
        }
        .instrument(span)
        .await;

        if let Err(e) = &result {
            ctx.log_stage(RelayStage::Failed(e.kind()));
            ctx.log_error(&e.to_string());
            record_request(
                e.kind(),
                &ctx.model,
                ctx.streaming,
                ctx.start_time.elapsed().as_secs_f64(),
            );
        }
        result
    }

    /// Authenticate, correlate and account the prompt
    async fn prepare(
        &self,
        ctx: &mut RequestContext,
        request: RelayRequest,
        chat: ChatCompletionRequest,
    ) -> AppResult<Prepared> {
        ctx.log_stage(RelayStage::Authenticating);
        let provider = self
            .resolver
            .resolve(&request.credential, &chat.model)
            .await?
            .ok_or(AppError::Unauthorized)?;
        ctx.provider = Some(provider.provider_name.clone());

        ctx.log_stage(RelayStage::CorrelatingThread);
        let last_user = chat.last_user_text();
        let explicit = request
            .headers
            .get(CONVERSATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let thread_id = match explicit {
            Some(id) => id,
            None => match self.correlator.correlate(&last_user, Utc::now()).await {
                Some(id) => id,
                None => mint_thread_id(),
            },
        };
        ctx.thread_id = Some(thread_id.clone());
        ctx.log_request_start();

        ctx.log_stage(RelayStage::AccountingPrompt);
        let prompt_text = chat.prompt_text();
        self.accountant
            .account_prompt(
                &thread_id,
                provider.provider_id,
                &chat.model,
                &prompt_text,
                &last_user,
            )
            .await;

        let url = upstream_url(&provider.base_url);
        let upstream_headers = build_upstream_headers(&provider.upstream_secret, chat.stream)?;

        let mut record = ExchangeRecord::now(
            &request.headers,
            url.clone(),
            request.client_host,
            chat.body.clone(),
            thread_id.clone(),
        );
        record.prompt = prompt_text;

        Ok(Prepared {
            request: chat,
            provider,
            thread_id,
            url,
            upstream_headers,
            record,
        })
    }

    fn completion_guard(&self, ctx: &RequestContext, prepared: &Prepared) -> CompletionAccounting {
        CompletionAccounting::new(
            self.accountant.clone(),
            self.exchange_log.clone(),
            prepared.record.clone(),
            ctx.clone(),
            prepared.provider.provider_id,
        )
    }

    /// Run `attempt` under the retry policy and the overall time budget
    async fn call_upstream<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        prepared: &Prepared,
        attempt: F,
    ) -> AppResult<T>
    where
        F: Fn(reqwest::RequestBuilder) -> Fut,
        Fut: std::future::Future<Output = Result<T, AttemptError>>,
    {
        let timeout = self.vendors.timeout_for(&prepared.request.model);
        let provider = prepared.provider.provider_name.as_str();

        let retried = self.retry.run(
            |n| {
                ctx.log_stage(RelayStage::CallingUpstream { attempt: n });
                ctx.log_upstream_request(&prepared.url, n, timeout.as_millis());
                let builder = self.upstream.request(
                    &prepared.url,
                    prepared.upstream_headers.clone(),
                    prepared.request.raw.clone(),
                );
                let fut = attempt(builder);
                async move {
                    let outcome = match tokio::time::timeout(timeout, fut).await {
                        Ok(result) => result,
                        Err(_) => Err(AttemptError::Timeout),
                    };
                    let label = match &outcome {
                        Ok(_) => "ok",
                        Err(AttemptError::Timeout) => "timeout",
                        Err(AttemptError::Connect(_)) => "connect_error",
                        Err(AttemptError::Request(_)) => "request_error",
                    };
                    record_upstream_attempt(provider, label);
                    outcome
                }
            },
            AttemptError::is_retryable,
            |n, e| ctx.log_retry(n, &e.to_string()),
        );

        let budget = self.retry.total_budget(timeout);
        match tokio::time::timeout(budget, retried).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err((AttemptError::Timeout, attempts))) => Err(AppError::UpstreamTimeout { attempts }),
            Ok(Err((AttemptError::Connect(msg) | AttemptError::Request(msg), _))) => {
                Err(AppError::UpstreamUnreachable(msg))
            }
            Err(_) => Err(AppError::UpstreamTimeout {
                attempts: self.retry.max_attempts,
            }),
        }
    }

    /// Non-streaming: buffer the whole upstream body, then reply once
    async fn relay_buffered(&self, ctx: &RequestContext, prepared: Prepared) -> AppResult<Response> {
        let (status, headers, body) = self
            .call_upstream(ctx, &prepared, |builder| async move {
                let response = builder.send().await.map_err(AttemptError::from_reqwest)?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.bytes().await.map_err(AttemptError::from_reqwest)?;
                Ok::<_, AttemptError>((status, headers, body))
            })
            .await?;
        ctx.log_upstream_response(status.as_u16());

        if !status.is_success() {
            return Err(AppError::UpstreamStatus {
                status,
                headers: passthrough_headers(&headers),
                body,
            });
        }

        ctx.log_stage(RelayStage::BufferingReply);
        let model = &prepared.request.model;
        let defaults = EnvelopeDefaults::new(model.clone());
        let parsed = serde_json::from_slice::<serde_json::Value>(&body).ok();

        let text = parsed
            .as_ref()
            .map(|v| completion_text(v, &defaults))
            .unwrap_or_default();

        let reply = match parsed {
            Some(value) if self.vendors.is_divergent(model) => {
                debug!(trace_id = %ctx.trace_id, "Returning normalized body for divergent vendor");
                Bytes::from(serde_json::to_vec(&normalize_body(value, &defaults))?)
            }
            _ => body,
        };

        let mut guard = self.completion_guard(ctx, &prepared);
        guard.push_text(&text);
        guard.finish().await;

        let mut response = Response::new(Body::from(reply));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(CONVERSATION_HEADER, thread_header(&prepared.thread_id)?);
        Ok(response)
    }

    /// Streaming: retries only cover establishing the upstream response.
    /// Once bytes flow, failures become an inline error event.
    async fn relay_streaming(&self, ctx: &RequestContext, prepared: Prepared) -> AppResult<Response> {
        let upstream = self
            .call_upstream(ctx, &prepared, |builder| async move {
                builder.send().await.map_err(AttemptError::from_reqwest)
            })
            .await?;

        let status = upstream.status();
        ctx.log_upstream_response(status.as_u16());
        if !status.is_success() {
            let headers = passthrough_headers(upstream.headers());
            let timeout = self.vendors.timeout_for(&prepared.request.model);
            let body = match tokio::time::timeout(timeout, upstream.bytes()).await {
                Ok(Ok(body)) => body,
                _ => Bytes::new(),
            };
            return Err(AppError::UpstreamStatus {
                status,
                headers,
                body,
            });
        }

        ctx.log_stage(RelayStage::StreamingReply);
        ctx.log_stream_started();

        let idle_timeout = self.vendors.timeout_for(&prepared.request.model);
        let mut normalizer =
            StreamNormalizer::new(EnvelopeDefaults::new(prepared.request.model.clone()));
        let mut guard = self.completion_guard(ctx, &prepared);
        let stream_ctx = ctx.clone();
        let mut upstream_bytes = Box::pin(upstream.bytes_stream());

        let stream = async_stream::stream! {
            loop {
                let frames = match tokio::time::timeout(idle_timeout, upstream_bytes.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        let before = normalizer.accumulated_content().len();
                        let frames = normalizer.feed(&chunk);
                        guard.push_text(&normalizer.accumulated_content()[before..]);
                        frames
                    }
                    Ok(Some(Err(e))) => {
                        stream_ctx.log_error(&format!("upstream stream failed: {}", e));
                        let frames = normalizer.fail("UPSTREAM_STREAM_ERROR", "Upstream stream failed");
                        for frame in frames {
                            yield Ok::<Bytes, Infallible>(frame);
                        }
                        break;
                    }
                    Ok(None) => {
                        for frame in normalizer.finish() {
                            yield Ok(frame);
                        }
                        break;
                    }
                    Err(_) => {
                        stream_ctx.log_error("upstream stream idle timeout");
                        let frames = normalizer.fail("UPSTREAM_TIMEOUT", "Upstream stream timed out");
                        for frame in frames {
                            yield Ok(frame);
                        }
                        break;
                    }
                };
                for frame in frames {
                    yield Ok(frame);
                }
            }

            stream_ctx.log_stream_ended(normalizer.chunk_count());
            guard.finish().await;
        };

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no")
            .header(CONVERSATION_HEADER, thread_header(&prepared.thread_id)?)
            .body(Body::from_stream(stream))
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))
    }
}

fn thread_header(thread_id: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(thread_id)
        .map_err(|_| AppError::BadRequest("Invalid conversation id".to_string()))
}
