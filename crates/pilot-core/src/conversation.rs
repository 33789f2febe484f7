// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only conversation log with pairing invariants and cost accounting.
//!
//! Invariants maintained by every append:
//! - the system prompt, when present, sits at index 0
//! - every assistant message with tool calls is followed by exactly one tool
//!   message per declared call id, in declaration order, before any other
//!   non-tool message
//! - no tool message without a matching outstanding call id
//!
//! Trimming removes whole turns (user message through the message before the
//! next user message) so the invariants survive.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use pilot_model::{Message, ToolCallRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("assistant message appended while tool call {id} is unanswered")]
    OutstandingToolCall { id: String },

    #[error("tool result {id} does not match the next outstanding call")]
    MismatchedToolResult { id: String },

    #[error("conversation io error: {0}")]
    Io(String),

    #[error("conversation decode error: {0}")]
    Decode(String),
}

/// Running usage and cost totals for one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostState {
    pub requests: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub total_cost: f64,
    pub last_ctx_tokens: u32,
    pub last_ctx_pct: f64,
    pub peak_ctx_tokens: u32,
    pub peak_ctx_pct: f64,
    pub context_window: u32,
}

/// On-disk form of a saved conversation.
#[derive(Debug, Serialize, Deserialize)]
struct SavedConversation {
    name: String,
    saved_at: DateTime<Utc>,
    messages: Vec<Message>,
    cost: CostState,
}

#[derive(Debug)]
pub struct Conversation {
    messages: Vec<Message>,
    name: Option<String>,
    cost: CostState,
    redact_tool_bytes: usize,
    redact_keep_turns: usize,
}

impl Conversation {
    pub fn new(system_prompt: Option<String>, context_window: u32) -> Self {
        let mut messages = Vec::new();
        if let Some(prompt) = system_prompt {
            messages.push(Message::system(prompt));
        }
        Self {
            messages,
            name: None,
            cost: CostState { context_window, ..CostState::default() },
            redact_tool_bytes: 4096,
            redact_keep_turns: 3,
        }
    }

    /// Configure the soft-redaction policy for [`Self::messages_for_api`].
    /// `redact_tool_bytes = 0` disables redaction.
    pub fn with_redaction(mut self, redact_tool_bytes: usize, redact_keep_turns: usize) -> Self {
        self.redact_tool_bytes = redact_tool_bytes;
        self.redact_keep_turns = redact_keep_turns;
        self
    }

    // ── Appends ──────────────────────────────────────────────────────────────

    /// Replace (or install) the system prompt at index 0.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let msg = Message::system(prompt);
        match self.messages.first() {
            Some(m) if m.is_system() => self.messages[0] = msg,
            _ => self.messages.insert(0, msg),
        }
    }

    pub fn add_user(&mut self, text: impl Into<String>) -> Result<(), ConversationError> {
        self.ensure_no_outstanding()?;
        self.messages.push(Message::user(text));
        Ok(())
    }

    pub fn add_assistant(
        &mut self,
        text: impl Into<String>,
        reasoning: Option<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Result<(), ConversationError> {
        self.ensure_no_outstanding()?;
        self.messages.push(Message::Assistant {
            content: text.into(),
            reasoning,
            tool_calls,
        });
        Ok(())
    }

    /// Append a tool result; it must answer the next outstanding call id in
    /// declaration order.
    pub fn add_tool_result(
        &mut self,
        call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), ConversationError> {
        let call_id = call_id.into();
        match self.outstanding_call_ids().first() {
            Some(expected) if *expected == call_id => {
                self.messages.push(Message::tool_result(call_id, content));
                Ok(())
            }
            _ => Err(ConversationError::MismatchedToolResult { id: call_id }),
        }
    }

    fn ensure_no_outstanding(&self) -> Result<(), ConversationError> {
        match self.outstanding_call_ids().first() {
            Some(id) => Err(ConversationError::OutstandingToolCall { id: id.clone() }),
            None => Ok(()),
        }
    }

    /// Call ids declared by the trailing assistant message that have not yet
    /// been answered, in declaration order.
    pub fn outstanding_call_ids(&self) -> Vec<String> {
        // Walk backwards over the trailing tool results to find the group's
        // assistant message.
        let mut answered = 0usize;
        let mut idx = self.messages.len();
        while idx > 0 && self.messages[idx - 1].is_tool() {
            answered += 1;
            idx -= 1;
        }
        let Some(Message::Assistant { tool_calls, .. }) = idx.checked_sub(1).map(|i| &self.messages[i])
        else {
            return Vec::new();
        };
        tool_calls
            .iter()
            .skip(answered)
            .map(|c| c.id.clone())
            .collect()
    }

    // ── Views ────────────────────────────────────────────────────────────────

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn raw_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn cost(&self) -> &CostState {
        &self.cost
    }

    /// API view of the message list.
    ///
    /// Tool results larger than the configured byte threshold that lie before
    /// the recent-turn window are replaced whole by a short placeholder
    /// carrying the original byte count.  Structure is never altered, so the
    /// pairing invariants hold on the view.
    pub fn messages_for_api(&self) -> Vec<Message> {
        if self.redact_tool_bytes == 0 {
            return self.messages.clone();
        }
        let cutoff = self.keep_window_start();
        self.messages
            .iter()
            .enumerate()
            .map(|(i, m)| match m {
                Message::Tool { tool_call_id, content }
                    if i < cutoff && content.len() > self.redact_tool_bytes =>
                {
                    Message::tool_result(
                        tool_call_id.clone(),
                        format!("[tool output elided: {} bytes]", content.len()),
                    )
                }
                other => other.clone(),
            })
            .collect()
    }

    /// Index of the first message of the `redact_keep_turns`-most-recent turn.
    fn keep_window_start(&self) -> usize {
        let mut user_indices: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_user())
            .map(|(i, _)| i)
            .collect();
        if user_indices.len() <= self.redact_keep_turns {
            return 0;
        }
        user_indices.drain(..user_indices.len() - self.redact_keep_turns);
        user_indices[0]
    }

    // ── Trimming ─────────────────────────────────────────────────────────────

    /// Remove the earliest complete turn: the span from the first user message
    /// up to (but excluding) the next user message.
    ///
    /// Returns `false` when only the system prompt plus the final turn
    /// remain — that last turn is never trimmed.
    pub fn trim_oldest_turn(&mut self) -> bool {
        let user_indices: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_user())
            .map(|(i, _)| i)
            .collect();
        if user_indices.len() < 2 {
            return false;
        }
        let start = user_indices[0];
        let end = user_indices[1];
        debug!(start, end, "trimming oldest turn");
        self.messages.drain(start..end);
        true
    }

    // ── Accounting ───────────────────────────────────────────────────────────

    /// Fold one request's usage into the running totals.
    ///
    /// `ctx` is the total context consumed by the most recent request;
    /// `ctx_window` updates the stored window size when non-zero.  Cost is
    /// recomputed from the cumulative token totals when prices are present.
    #[allow(clippy::too_many_arguments)]
    pub fn add_usage(
        &mut self,
        input_tokens: u64,
        output_tokens: u64,
        cached_tokens: u64,
        ctx: u32,
        ctx_window: u32,
        prompt_price: Option<f64>,
        completion_price: Option<f64>,
    ) {
        self.cost.requests += 1;
        self.cost.input_tokens += input_tokens;
        self.cost.output_tokens += output_tokens;
        self.cost.cached_tokens += cached_tokens;
        if ctx_window > 0 {
            self.cost.context_window = ctx_window;
        }
        self.cost.total_cost = match (prompt_price, completion_price) {
            (Some(p_in), Some(p_out)) => {
                self.cost.input_tokens as f64 * p_in + self.cost.output_tokens as f64 * p_out
            }
            _ => 0.0,
        };
        self.cost.last_ctx_tokens = ctx;
        self.cost.last_ctx_pct = if self.cost.context_window > 0 {
            100.0 * ctx as f64 / self.cost.context_window as f64
        } else {
            0.0
        };
        if ctx > self.cost.peak_ctx_tokens {
            self.cost.peak_ctx_tokens = ctx;
            self.cost.peak_ctx_pct = self.cost.last_ctx_pct;
        }
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    fn conversations_dir() -> PathBuf {
        pilot_config::config_home().join("agent/conversations")
    }

    pub fn save(&mut self, name: &str) -> Result<PathBuf, ConversationError> {
        let dir = Self::conversations_dir();
        std::fs::create_dir_all(&dir).map_err(|e| ConversationError::Io(e.to_string()))?;
        let path = dir.join(format!("{name}.json"));
        let saved = SavedConversation {
            name: name.to_string(),
            saved_at: Utc::now(),
            messages: self.messages.clone(),
            cost: self.cost,
        };
        let json = serde_json::to_string_pretty(&saved)
            .map_err(|e| ConversationError::Decode(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| ConversationError::Io(e.to_string()))?;
        self.name = Some(name.to_string());
        Ok(path)
    }

    pub fn load(name: &str) -> Result<Self, ConversationError> {
        let path = Self::conversations_dir().join(format!("{name}.json"));
        let text = std::fs::read_to_string(&path).map_err(|e| ConversationError::Io(e.to_string()))?;
        let saved: SavedConversation =
            serde_json::from_str(&text).map_err(|e| ConversationError::Decode(e.to_string()))?;
        Ok(Self {
            messages: saved.messages,
            name: Some(saved.name),
            cost: saved.cost,
            redact_tool_bytes: 4096,
            redact_keep_turns: 3,
        })
    }

    /// Names of all saved conversations.
    pub fn list_saved() -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(Self::conversations_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".json").map(str::to_string)
            })
            .collect();
        names.sort();
        names
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
