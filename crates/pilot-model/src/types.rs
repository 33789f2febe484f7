// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;

// ─── Message types ────────────────────────────────────────────────────────────

/// A single tool invocation in its flat normalized form.
///
/// This is the only tool-call shape used internally.  The nested
/// `{function: {name, arguments}}` wire shape exists solely at the transport
/// boundary (see `wire.rs`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Server-assigned call id; minted locally when the server omits it
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object
    pub arguments: String,
}

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRecord>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { content: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User { content: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCallRecord>) -> Self {
        Self::Assistant {
            content: text.into(),
            reasoning: None,
            tool_calls: calls,
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: id.into(),
            content: content.into(),
        }
    }

    /// Plain text of this message; tool results return their payload.
    pub fn text(&self) -> &str {
        match self {
            Self::System { content }
            | Self::User { content }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCallRecord] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User { .. })
    }

    pub fn is_tool(&self) -> bool {
        matches!(self, Self::Tool { .. })
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    /// Approximate token count used for context management.
    ///
    /// 4-chars-per-token heuristic; tool calls count name + arguments.
    pub fn approx_tokens(&self) -> usize {
        let chars = match self {
            Self::Assistant {
                content,
                reasoning,
                tool_calls,
            } => {
                content.len()
                    + reasoning.as_deref().map(str::len).unwrap_or(0)
                    + tool_calls
                        .iter()
                        .map(|c| c.name.len() + c.arguments.len())
                        .sum::<usize>()
            }
            other => other.text().len(),
        };
        (chars / 4).max(1)
    }
}

// ─── Request parameters ───────────────────────────────────────────────────────

/// Sampling parameters forwarded verbatim to the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sampler {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
}

/// A tool schema handed to the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Which completion endpoint to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endpoint {
    /// `/chat/completions` — the default dialect
    #[default]
    Chat,
    /// `/responses` — item-based alternate dialect
    Responses,
}

/// Predicate polled by the transport on its scheduler tick.
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Per-request options.
#[derive(Clone, Default)]
pub struct RequestOptions {
    /// Pre-resolved tool schemas sent with the request
    pub tools: Vec<ToolSpec>,
    /// `"auto"`, `"none"`, or a specific tool name
    pub tool_choice: Option<String>,
    pub endpoint: Endpoint,
    /// Cancellation predicate; polled every ~50 ms while streaming
    pub is_cancelled: Option<CancelCheck>,
    /// Responses endpoint only: continue from a prior response
    pub previous_response_id: Option<String>,
}

// ─── Response types ───────────────────────────────────────────────────────────

/// Token usage accumulated from server usage frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub requests: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.requests += other.requests;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

/// The result of one transport call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub reasoning_text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Completion tokens of this request (`completion_tokens ?? output_tokens ?? 0`)
    pub tokens: u32,
    /// Total context consumed by this request (`total_tokens ?? input + output`)
    pub ctx: u32,
    /// Generation rate in tokens per wall second; 0 when unavailable
    pub rate: f64,
    pub model: String,
    pub response_id: Option<String>,
    pub finish_reason: Option<String>,
    pub cancelled: bool,
    /// Usage summed over every server usage frame observed in this call
    pub usage: Usage,
    /// Set by the tool loop when the user aborted mid-loop
    pub aborted: bool,
    pub abort_message: Option<String>,
    /// Synthetic warning (e.g. max_steps exhaustion) attached by the loop
    pub warning: Option<String>,
}

/// Kind of a streamed text delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Reasoning,
    Output,
}

/// Callbacks invoked by the transport while a stream is live.
///
/// Handlers run on the same task as the stream loop, so they may hold
/// `&mut` terminal state without synchronization.
#[async_trait]
pub trait StreamHandler: Send {
    async fn on_chunk(&mut self, kind: ChunkKind, text: &str);
    async fn on_retry(&mut self, _attempt: u32, _status: u16) {}
    async fn on_done(&mut self) {}
    async fn on_error(&mut self, _message: &str) {}
}

/// Handler that discards every event; used by the unary path and in tests.
pub struct NullHandler;

#[async_trait]
impl StreamHandler for NullHandler {
    async fn on_chunk(&mut self, _kind: ChunkKind, _text: &str) {}
}

/// Transport seam used by the tool loop; implemented by [`crate::ChatClient`]
/// and by the scripted mock.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn stream(
        &self,
        model: &str,
        messages: &[Message],
        sampler: &Sampler,
        handler: &mut dyn StreamHandler,
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError>;

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        sampler: &Sampler,
        opts: &RequestOptions,
    ) -> Result<ChatResponse, TransportError>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_role() {
        assert!(Message::system("s").is_system());
        assert!(Message::user("u").is_user());
        assert!(Message::tool_result("c1", "out").is_tool());
        assert!(matches!(Message::assistant("a"), Message::Assistant { .. }));
    }

    #[test]
    fn text_returns_content_for_every_role() {
        assert_eq!(Message::user("hello").text(), "hello");
        assert_eq!(Message::tool_result("id", "payload").text(), "payload");
    }

    #[test]
    fn tool_calls_empty_for_non_assistant() {
        assert!(Message::user("x").tool_calls().is_empty());
        assert!(Message::tool_result("id", "x").tool_calls().is_empty());
    }

    #[test]
    fn approx_tokens_divides_by_four_with_floor_of_one() {
        assert_eq!(Message::user("12345678").approx_tokens(), 2);
        assert_eq!(Message::user("hi").approx_tokens(), 1);
        assert_eq!(Message::user("").approx_tokens(), 1);
    }

    #[test]
    fn approx_tokens_counts_tool_call_name_and_args() {
        let m = Message::assistant_with_calls(
            "",
            vec![ToolCallRecord {
                id: "c1".into(),
                name: "aaaa".into(),          // 4 chars
                arguments: "bbbbbbbb".into(), // 8 chars
            }],
        );
        assert_eq!(m.approx_tokens(), 3);
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::assistant_with_calls(
            "text",
            vec![ToolCallRecord {
                id: "c1".into(),
                name: "shell".into(),
                arguments: r#"{"command":"ls"}"#.into(),
            }],
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text(), "text");
        assert_eq!(back.tool_calls().len(), 1);
        assert_eq!(back.tool_calls()[0].id, "c1");
    }

    #[test]
    fn assistant_without_calls_omits_tool_calls_field() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert!(!json.contains("tool_calls"), "empty vec must be skipped: {json}");
        assert!(!json.contains("reasoning"), "absent reasoning must be skipped: {json}");
    }

    #[test]
    fn usage_add_accumulates_all_counters() {
        let mut a = Usage { requests: 1, input_tokens: 100, output_tokens: 20, cached_tokens: 50 };
        a.add(&Usage { requests: 1, input_tokens: 30, output_tokens: 5, cached_tokens: 0 });
        assert_eq!(a.requests, 2);
        assert_eq!(a.input_tokens, 130);
        assert_eq!(a.output_tokens, 25);
        assert_eq!(a.cached_tokens, 50);
    }

    #[test]
    fn sampler_serializes_only_set_fields() {
        let s = Sampler { temperature: Some(0.7), ..Sampler::default() };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("temperature"));
        assert!(!json.contains("top_p"));
    }
}
