// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Scripted transport for tests.
//!
//! Plays back a fixed sequence of [`ChatResponse`]s, one per call, streaming
//! each response's text through the handler in small chunks so consumers
//! exercise their incremental paths.  Records every request's message list
//! for assertions.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::types::{
    ChatResponse, ChatTransport, ChunkKind, Message, RequestOptions, Sampler, StreamHandler,
    ToolCallRecord, Usage,
};
use crate::validate::validate_sequence;

#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<Vec<ChatResponse>>,
    requests: Mutex<Vec<Vec<Message>>>,
    previous_ids: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub fn new(mut responses: Vec<ChatResponse>) -> Self {
        // Stored reversed so pop() yields them in script order.
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            previous_ids: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a plain text response.
    pub fn text_response(text: &str) -> ChatResponse {
        ChatResponse {
            text: text.to_string(),
            usage: Usage { requests: 1, input_tokens: 10, output_tokens: 5, cached_tokens: 0 },
            tokens: 5,
            ctx: 15,
            model: "mock".into(),
            ..ChatResponse::default()
        }
    }

    /// Convenience: a response carrying tool calls.
    pub fn tool_call_response(calls: Vec<ToolCallRecord>) -> ChatResponse {
        ChatResponse {
            tool_calls: calls,
            usage: Usage { requests: 1, input_tokens: 10, output_tokens: 5, cached_tokens: 0 },
            tokens: 5,
            ctx: 15,
            model: "mock".into(),
            finish_reason: Some("tool_calls".into()),
            ..ChatResponse::default()
        }
    }

    /// Message lists captured from each call, in call order.
    pub fn seen_requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// `previous_response_id` values captured from each call, in call order.
    pub fn seen_previous_ids(&self) -> Vec<Option<String>> {
        self.previous_ids.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    fn next_response(
        &self,
        messages: &[Message],
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError> {
        validate_sequence(messages)?;
        self.requests.lock().unwrap().push(messages.to_vec());
        self.previous_ids
            .lock()
            .unwrap()
            .push(opts.previous_response_id.clone());
        self.responses
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| TransportError::Decode("scripted transport exhausted".into()))
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn stream(
        &self,
        _model: &str,
        messages: &[Message],
        _sampler: &Sampler,
        handler: &mut dyn StreamHandler,
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError> {
        let mut resp = self.next_response(messages, opts)?;
        if let Some(cancelled) = &opts.is_cancelled {
            if cancelled() {
                resp.cancelled = true;
            }
        }
        if !resp.reasoning_text.is_empty() {
            handler.on_chunk(ChunkKind::Reasoning, &resp.reasoning_text).await;
        }
        // Stream in small pieces so renderers see genuine chunk boundaries.
        let text = resp.text.clone();
        let mut rest = text.as_str();
        while !rest.is_empty() {
            let take = rest
                .char_indices()
                .nth(7)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let (piece, tail) = rest.split_at(take);
            handler.on_chunk(ChunkKind::Output, piece).await;
            rest = tail;
        }
        handler.on_done().await;
        Ok(resp)
    }

    async fn complete(
        &self,
        _model: &str,
        messages: &[Message],
        _sampler: &Sampler,
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError> {
        self.next_response(messages, opts)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
