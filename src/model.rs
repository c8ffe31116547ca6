//! Rate-limited invocation pipeline for one bound model.
//!
//! A call runs: validate → model check → token estimate → admission →
//! dispatch (unary or stream) → usage reconciliation → parse. Everything from
//! dispatch onward is retried on transient failures; admission and model
//! checks fail immediately.

use crate::cost::Cost;
use crate::error::Error;
use crate::matcher::{match_response, MatchedResponse, RawPayload};
use crate::rate_limit::{parse_http_date, RateLimiter};
use crate::request::ChatCompletionRequest;
use crate::response::{ChatCompletionChunk, ChatCompletionResponse};
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::stream::StreamEvent;
use crate::tables::ModelTables;
use crate::tokens::TokenEstimator;
use crate::transport::{Payload, RequestTransport};
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, DATE};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

/// Per-call options.
pub struct InvokeOptions<'a> {
    estimated_output_len: Option<u32>,
    parse_response: bool,
    output: Option<&'a mut (dyn AsyncWrite + Unpin + Send)>,
}

impl<'a> InvokeOptions<'a> {
    pub fn new() -> Self {
        Self {
            estimated_output_len: None,
            parse_response: true,
            output: None,
        }
    }

    /// Expected output length for admission when the request has no `max_tokens`.
    pub fn estimated_output_len(mut self, tokens: u32) -> Self {
        self.estimated_output_len = Some(tokens);
        self
    }

    /// Return the raw payload instead of typed responses.
    pub fn parse_response(mut self, parse: bool) -> Self {
        self.parse_response = parse;
        self
    }

    /// Copy the raw body of a unary call into `writer` instead of parsing it.
    /// Ignored for streamed calls.
    pub fn output(mut self, writer: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        self.output = Some(writer);
        self
    }
}

impl Default for InvokeOptions<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone)]
pub enum Invocation {
    /// Typed response.
    Parsed(MatchedResponse),
    /// Unparsed payload, when parsing was turned off.
    Raw(RawPayload),
    /// Body was written to the caller's writer; holds the byte count.
    Written(u64),
}

impl Invocation {
    pub fn into_completion(self) -> Option<ChatCompletionResponse> {
        match self {
            Invocation::Parsed(matched) => matched.into_completion(),
            _ => None,
        }
    }

    pub fn into_chunks(self) -> Option<Vec<ChatCompletionChunk>> {
        match self {
            Invocation::Parsed(matched) => matched.into_chunks(),
            _ => None,
        }
    }

    pub fn into_raw(self) -> Option<RawPayload> {
        match self {
            Invocation::Raw(raw) => Some(raw),
            _ => None,
        }
    }
}

/// Client bound to one model name.
pub struct ChatModel {
    model: String,
    transport: RequestTransport,
    rate_limiter: Arc<RateLimiter>,
    estimator: Arc<TokenEstimator>,
    tables: Arc<ModelTables>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    /// Cached default output length; 0 means not looked up yet.
    estimated_output_len: AtomicU32,
}

impl ChatModel {
    /// Create a model client with the heuristic estimator, empty tables and
    /// the default retry policy.
    pub fn new(
        model: impl Into<String>,
        transport: RequestTransport,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            model: model.into(),
            transport,
            rate_limiter,
            estimator: Arc::new(TokenEstimator::heuristic()),
            tables: Arc::new(ModelTables::default()),
            retry: RetryPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
            estimated_output_len: AtomicU32::new(0),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_tables(mut self, tables: Arc<ModelTables>) -> Self {
        self.tables = tables;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn transport(&self) -> &RequestTransport {
        &self.transport
    }

    /// Run a call with default options.
    pub async fn invoke(&self, request: &ChatCompletionRequest) -> Result<Invocation, Error> {
        self.invoke_with(request, InvokeOptions::default()).await
    }

    /// Run a call through the full pipeline.
    pub async fn invoke_with(
        &self,
        request: &ChatCompletionRequest,
        mut options: InvokeOptions<'_>,
    ) -> Result<Invocation, Error> {
        request.validate()?;

        let input_token_len = self.input_token_len(request)?;
        let explicit = request
            .max_tokens
            .filter(|t| *t != 0)
            .or(options.estimated_output_len);
        let estimated_output_len = self.output_len_estimate(explicit);

        if !self.verify_invoke_viability(input_token_len, estimated_output_len) {
            return Err(Error::RateLimitExceeded {
                endpoint: self.transport.endpoint().to_string(),
                input_token_len,
                estimated_output_len,
            });
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                model = %self.model,
                endpoint = %self.transport.endpoint(),
                attempt,
                stream = request.is_stream(),
                input_token_len,
                estimated_output_len,
                "dispatching request"
            );

            let result = if request.is_stream() {
                self.dispatch_stream(request, options.parse_response).await
            } else {
                self.dispatch_unary(request, options.output.as_deref_mut(), options.parse_response)
                    .await
            };

            match result {
                Ok(invocation) => return Ok(invocation),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        model = %self.model,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Estimated input tokens of the request's messages.
    pub fn input_token_len(&self, request: &ChatCompletionRequest) -> Result<u32, Error> {
        self.check_model(request)?;
        Ok(self.estimator.estimate_messages(&request.messages))
    }

    /// Release elapsed budget and check whether a call of this size fits.
    ///
    /// A zero `estimated_output_len` falls back to the cached or table default.
    pub fn verify_invoke_viability(&self, input_token_len: u32, estimated_output_len: u32) -> bool {
        let estimated_output_len = self.output_len_estimate(Some(estimated_output_len));
        self.rate_limiter
            .admit(input_token_len, estimated_output_len)
    }

    /// Price of sending `input_text` and receiving `estimated_output_tokens`.
    pub fn estimate_text_price(
        &self,
        input_text: &str,
        estimated_output_tokens: u32,
    ) -> Result<f64, Error> {
        self.estimate_cost(input_text, estimated_output_tokens)
            .map(|cost| cost.total())
    }

    /// Input/output cost breakdown for `input_text` and `estimated_output_tokens`.
    pub fn estimate_cost(
        &self,
        input_text: &str,
        estimated_output_tokens: u32,
    ) -> Result<Cost, Error> {
        let price = self.tables.prices.require(&self.model)?;
        let input_tokens = self.estimator.estimate(input_text);
        Ok(price.estimate(input_tokens, estimated_output_tokens))
    }

    /// Output length used for admission.
    ///
    /// Explicit non-zero value, else the cached estimate, else the table
    /// default (cached on first lookup), else 0.
    fn output_len_estimate(&self, explicit: Option<u32>) -> u32 {
        if let Some(tokens) = explicit.filter(|t| *t != 0) {
            return tokens;
        }

        let cached = self.estimated_output_len.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }

        let default = self.tables.max_output_tokens.get(&self.model).unwrap_or(0);
        self.estimated_output_len.store(default, Ordering::Relaxed);
        default
    }

    fn check_model(&self, request: &ChatCompletionRequest) -> Result<(), Error> {
        if request.model != self.model {
            return Err(Error::ModelMismatch {
                expected: self.model.clone(),
                actual: request.model.clone(),
            });
        }
        Ok(())
    }

    async fn dispatch_unary<W>(
        &self,
        request: &ChatCompletionRequest,
        output: Option<&mut W>,
        parse_response: bool,
    ) -> Result<Invocation, Error>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let (payload, headers) = self.transport.invoke(request, output).await?;

        match payload {
            Payload::Written(bytes) => {
                self.reconcile(None, None);
                Ok(Invocation::Written(bytes))
            }
            Payload::Body(body) => {
                // The call completed upstream: charge it even if the body is unusable
                let value = match serde_json::from_slice::<Value>(&body) {
                    Ok(value) => value,
                    Err(e) => {
                        self.reconcile(None, None);
                        return Err(Error::parse(e.to_string()));
                    }
                };
                self.reconcile(usage_total(&value), Some(&headers));
                self.finish(RawPayload::Json(value), parse_response)
            }
        }
    }

    async fn dispatch_stream(
        &self,
        request: &ChatCompletionRequest,
        parse_response: bool,
    ) -> Result<Invocation, Error> {
        let events: Vec<StreamEvent> = self.transport.stream(request).await?.try_collect().await?;

        // Only the final chunk carries usage
        let total_tokens = events
            .iter()
            .filter_map(StreamEvent::as_data)
            .last()
            .and_then(usage_total);
        let headers = events.iter().rev().find_map(StreamEvent::as_headers);
        self.reconcile(total_tokens, headers);

        self.finish(RawPayload::Stream(events), parse_response)
    }

    /// Charge the limiter for a completed call.
    fn reconcile(&self, total_tokens: Option<u64>, headers: Option<&HeaderMap>) {
        match total_tokens {
            Some(tokens) => {
                let server_time = headers
                    .and_then(|h| h.get(DATE))
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_http_date);
                self.rate_limiter.update(server_time, Some(tokens));
            }
            None => self.rate_limiter.update(None, None),
        }
        debug!(model = %self.model, total_tokens, "usage reconciled");
    }

    fn finish(&self, payload: RawPayload, parse_response: bool) -> Result<Invocation, Error> {
        if parse_response {
            match_response(self.transport.endpoint(), &payload).map(Invocation::Parsed)
        } else {
            Ok(Invocation::Raw(payload))
        }
    }
}

impl std::fmt::Debug for ChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModel")
            .field("model", &self.model)
            .field("transport", &self.transport)
            .field("rate_limiter", &self.rate_limiter)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn usage_total(value: &Value) -> Option<u64> {
    value.get("usage")?.get("total_tokens")?.as_u64()
}
