// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Chat client for OpenAI-compatible endpoints.
//!
//! Speaks the `/chat/completions` SSE dialect by default and the `/responses`
//! item dialect as an alternate.  Retries with capped backoff on 429/5xx,
//! polls the cancellation predicate on a ~50 ms tick while streaming, and
//! reassembles per-index tool-call deltas before returning.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use pilot_config::ModelConfig;

use crate::error::TransportError;
use crate::types::{
    ChatResponse, ChatTransport, ChunkKind, Endpoint, Message, NullHandler, RequestOptions,
    Sampler, StreamHandler, ToolCallRecord, Usage,
};
use crate::validate::validate_sequence;
use crate::wire::{
    self, build_chat_body, build_responses_body, drain_complete_sse_lines, UsageFrame, WireEvent,
};

/// Default API base when `LLM_API_URL` and config are silent.
const DEFAULT_API_URL: &str = "http://localhost:8080/v1";

/// Default unary request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Backoff schedule for retryable statuses; its length is the retry cap.
const BACKOFF: [Duration; 2] = [Duration::from_millis(2000), Duration::from_millis(5000)];

/// Cancellation poll granularity.
const POLL_TICK: Duration = Duration::from_millis(50);

/// End-of-sequence markers some servers leak into the text stream.
const EOS_MARKERS: [&str; 3] = ["<|im_end|>", "<|eot_id|>", "</s>"];

pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ChatClient {
    pub fn new(cfg: &ModelConfig) -> Self {
        let base = cfg
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Self::from_parts(
            &base,
            cfg.api_key.clone(),
            Duration::from_secs(cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        )
    }

    pub fn from_parts(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> String {
        match endpoint {
            Endpoint::Chat => format!("{}/chat/completions", self.base_url),
            Endpoint::Responses => format!("{}/responses", self.base_url),
        }
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// List model ids via `GET /models`.
    pub async fn list_models(&self) -> Result<Vec<String>, TransportError> {
        let url = format!("{}/models", self.base_url);
        let resp = self
            .authorized(self.http.get(&url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TransportError::HttpStatus {
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        let mut ids: Vec<String> = body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    /// Open the HTTP request, retrying on 429/5xx with capped backoff.
    ///
    /// Returns `Ok(None)` when cancellation fired during a backoff sleep.
    async fn send_with_retries(
        &self,
        url: &str,
        body: &Value,
        handler: &mut dyn StreamHandler,
        opts: &RequestOptions,
        unary: bool,
    ) -> Result<Option<reqwest::Response>, TransportError> {
        let mut attempt: u32 = 0;
        loop {
            let mut req = self.authorized(self.http.post(url)).json(body);
            if unary {
                req = req.timeout(self.timeout);
            }
            let resp = req
                .send()
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let status = resp.status().as_u16();
            if resp.status().is_success() {
                return Ok(Some(resp));
            }

            if TransportError::is_retryable_status(status) && (attempt as usize) < BACKOFF.len() {
                // Close this connection before sleeping; the body is dropped
                // with `resp` here.
                let delay = BACKOFF[attempt as usize];
                attempt += 1;
                warn!(status, attempt, delay_ms = delay.as_millis() as u64, "retrying request");
                handler.on_retry(attempt, status).await;
                if !cancellable_sleep(delay, opts).await {
                    return Ok(None);
                }
                continue;
            }

            let body_text = resp.text().await.unwrap_or_default();
            handler
                .on_error(&format!("server returned {status}"))
                .await;
            return Err(TransportError::HttpStatus { status, body: body_text });
        }
    }

    async fn stream_inner(
        &self,
        model: &str,
        messages: &[Message],
        sampler: &Sampler,
        handler: &mut dyn StreamHandler,
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError> {
        validate_sequence(messages)?;

        let body = match opts.endpoint {
            Endpoint::Chat => build_chat_body(model, messages, sampler, opts, true),
            Endpoint::Responses => build_responses_body(model, messages, sampler, opts, true),
        };
        let url = self.endpoint_url(opts.endpoint);
        debug!(%url, model, message_count = messages.len(), tool_count = opts.tools.len(),
            "streaming completion request");
        tracing::trace!(request_body = %body, "full request body");

        let resp = match self.send_with_retries(&url, &body, handler, opts, false).await? {
            Some(r) => r,
            // Cancelled during a backoff sleep: nothing was streamed.
            None => {
                return Ok(ChatResponse {
                    model: model.to_string(),
                    cancelled: true,
                    ..ChatResponse::default()
                })
            }
        };

        let started = Instant::now();
        let mut acc = Accumulator::new(model);
        let mut byte_stream = resp.bytes_stream();
        let mut line_buf = String::new();
        let mut ticker = tokio::time::interval(POLL_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        'stream: loop {
            tokio::select! {
                biased;
                _ = ticker.tick() => {
                    if is_cancelled(opts) {
                        // Dropping the byte stream closes the connection.
                        acc.cancelled = true;
                        break 'stream;
                    }
                }
                chunk = byte_stream.next() => {
                    let Some(chunk) = chunk else { break 'stream };
                    let bytes = chunk.map_err(|e| TransportError::Sse(e.to_string()))?;
                    line_buf.push_str(&String::from_utf8_lossy(&bytes));
                    for event in drain_complete_sse_lines(&mut line_buf, opts.endpoint) {
                        match event {
                            WireEvent::Done => break 'stream,
                            WireEvent::StreamError(msg) => {
                                handler.on_error(&msg).await;
                                return Err(TransportError::Sse(msg));
                            }
                            other => acc.apply(other, handler).await,
                        }
                    }
                }
            }
        }

        handler.on_done().await;
        Ok(acc.finish(started.elapsed()))
    }

    async fn complete_inner(
        &self,
        model: &str,
        messages: &[Message],
        sampler: &Sampler,
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError> {
        validate_sequence(messages)?;

        let body = match opts.endpoint {
            Endpoint::Chat => build_chat_body(model, messages, sampler, opts, false),
            Endpoint::Responses => build_responses_body(model, messages, sampler, opts, false),
        };
        let url = self.endpoint_url(opts.endpoint);
        debug!(%url, model, message_count = messages.len(), "unary completion request");

        let started = Instant::now();
        let mut sink = NullHandler;
        let resp = match self.send_with_retries(&url, &body, &mut sink, opts, true).await? {
            Some(r) => r,
            None => {
                return Ok(ChatResponse {
                    model: model.to_string(),
                    cancelled: true,
                    ..ChatResponse::default()
                })
            }
        };

        let v: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        tracing::trace!(response_body = %v, "full response body");
        let unary = wire::parse_unary(&v, opts.endpoint);

        let mut acc = Accumulator::new(unary.model.as_deref().unwrap_or(model));
        acc.text = unary.text;
        acc.reasoning = unary.reasoning;
        acc.finish_reason = unary.finish_reason;
        acc.response_id = unary.response_id;
        for (index, id, name, arguments) in unary.tool_calls {
            acc.pending.insert(index, PendingToolCall { id, name, args_buf: arguments });
        }
        if let Some(frame) = unary.usage {
            acc.add_usage(frame);
        }
        Ok(acc.finish(started.elapsed()))
    }
}

#[async_trait]
impl ChatTransport for ChatClient {
    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        sampler: &Sampler,
        handler: &mut dyn StreamHandler,
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError> {
        self.stream_inner(model, messages, sampler, handler, opts).await
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        sampler: &Sampler,
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError> {
        self.complete_inner(model, messages, sampler, opts).await
    }
}

fn is_cancelled(opts: &RequestOptions) -> bool {
    opts.is_cancelled.as_ref().map(|f| f()).unwrap_or(false)
}

/// Sleep for `delay`, polling the cancel predicate every tick.
/// Returns `false` when cancellation fired before the delay elapsed.
async fn cancellable_sleep(delay: Duration, opts: &RequestOptions) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if is_cancelled(opts) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(remaining.min(POLL_TICK)).await;
    }
    !is_cancelled(opts)
}

// ─── Streaming accumulator ────────────────────────────────────────────────────

struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

/// Collects deltas and usage frames for one transport call.
struct Accumulator {
    model: String,
    text: String,
    reasoning: String,
    /// Keyed by the server-supplied index; parallel calls interleave chunks.
    pending: HashMap<u32, PendingToolCall>,
    usage: Usage,
    last_output_tokens: u32,
    last_total_tokens: Option<u32>,
    last_input_tokens: u32,
    finish_reason: Option<String>,
    response_id: Option<String>,
    cancelled: bool,
}

impl Accumulator {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            text: String::new(),
            reasoning: String::new(),
            pending: HashMap::new(),
            usage: Usage::default(),
            last_output_tokens: 0,
            last_total_tokens: None,
            last_input_tokens: 0,
            finish_reason: None,
            response_id: None,
            cancelled: false,
        }
    }

    fn add_usage(&mut self, frame: UsageFrame) {
        self.usage.add(&Usage {
            requests: 1,
            input_tokens: frame.input_tokens,
            output_tokens: frame.output_tokens,
            cached_tokens: frame.cached_tokens,
        });
        self.last_input_tokens = frame.input_tokens;
        self.last_output_tokens = frame.output_tokens;
        self.last_total_tokens = frame.total_tokens;
    }

    async fn apply(&mut self, event: WireEvent, handler: &mut dyn StreamHandler) {
        match event {
            WireEvent::TextDelta(t) => {
                self.text.push_str(&t);
                handler.on_chunk(ChunkKind::Output, &t).await;
            }
            WireEvent::ReasoningDelta(t) => {
                self.reasoning.push_str(&t);
                handler.on_chunk(ChunkKind::Reasoning, &t).await;
            }
            WireEvent::ToolCallDelta { index, id, name, arguments } => {
                let slot = self.pending.entry(index).or_insert_with(|| PendingToolCall {
                    id: String::new(),
                    name: String::new(),
                    args_buf: String::new(),
                });
                if !id.is_empty() {
                    slot.id = id;
                }
                if !name.is_empty() {
                    slot.name = name;
                }
                slot.args_buf.push_str(&arguments);
            }
            WireEvent::Usage(frame) => self.add_usage(frame),
            WireEvent::Finish(reason) => self.finish_reason = Some(reason),
            WireEvent::ResponseId(id) => self.response_id = Some(id),
            WireEvent::StreamError(_) | WireEvent::Done => unreachable!("handled by caller"),
        }
    }

    fn finish(self, elapsed: Duration) -> ChatResponse {
        // Flush accumulated parallel tool calls ordered by index.  Calls with
        // an empty name cannot be dispatched and are dropped; the loop would
        // otherwise persist an unanswerable call into the conversation.
        let mut sorted: Vec<(u32, PendingToolCall)> = self.pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls: Vec<ToolCallRecord> = Vec::with_capacity(sorted.len());
        for (_, p) in sorted {
            if p.name.is_empty() {
                warn!(tool_call_id = %p.id, "dropping tool call with empty name");
                continue;
            }
            tool_calls.push(ToolCallRecord {
                id: p.id,
                name: p.name,
                arguments: if p.args_buf.is_empty() { "{}".into() } else { p.args_buf },
            });
        }

        let tokens = if self.last_output_tokens > 0 { self.last_output_tokens } else { 0 };
        let ctx = self
            .last_total_tokens
            .unwrap_or(self.last_input_tokens + tokens);
        let secs = elapsed.as_secs_f64();
        let rate = if tokens > 0 && secs > 0.0 { tokens as f64 / secs } else { 0.0 };

        ChatResponse {
            text: cleanup_text(&self.text),
            reasoning_text: self.reasoning.trim().to_string(),
            tool_calls,
            tokens,
            ctx,
            rate,
            model: self.model,
            response_id: self.response_id,
            finish_reason: self.finish_reason,
            cancelled: self.cancelled,
            usage: self.usage,
            aborted: false,
            abort_message: None,
            warning: None,
        }
    }
}

/// Strip EOS markers, leading newlines, and trailing whitespace.
pub(crate) fn cleanup_text(text: &str) -> String {
    let mut out = text.to_string();
    for marker in EOS_MARKERS {
        if out.contains(marker) {
            out = out.replace(marker, "");
        }
    }
    out.trim_start_matches('\n').trim_end().to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
