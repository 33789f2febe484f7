// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;

use crate::error::SequenceError;
use crate::types::Message;

/// Validate a message sequence against the wire dialect's pairing rules.
///
/// Rules enforced (all before any network I/O):
/// - a system message may only appear at index 0
/// - every assistant message with tool calls is followed by exactly one tool
///   message per declared call id, in declaration order, before any other
///   non-tool message
/// - no tool message without a matching outstanding call id
/// - no call id is declared twice while outstanding
/// - no tool calls remain outstanding at the end of the sequence
pub fn validate_sequence(messages: &[Message]) -> Result<(), SequenceError> {
    let mut outstanding: VecDeque<String> = VecDeque::new();

    for (index, msg) in messages.iter().enumerate() {
        if msg.is_system() && index != 0 {
            return Err(SequenceError::InvalidRoleOrdering {
                index,
                detail: "system message only allowed at index 0".into(),
            });
        }

        match msg {
            Message::Tool { tool_call_id, .. } => {
                match outstanding.front() {
                    None => {
                        return Err(SequenceError::UnknownToolCallId {
                            id: tool_call_id.clone(),
                        });
                    }
                    Some(front) if front == tool_call_id => {
                        outstanding.pop_front();
                    }
                    Some(_) => {
                        // In the outstanding set but out of declaration order,
                        // or not outstanding at all.
                        if outstanding.iter().any(|id| id == tool_call_id) {
                            return Err(SequenceError::InvalidRoleOrdering {
                                index,
                                detail: format!(
                                    "tool result {tool_call_id} out of declaration order"
                                ),
                            });
                        }
                        return Err(SequenceError::UnknownToolCallId {
                            id: tool_call_id.clone(),
                        });
                    }
                }
            }
            other => {
                if let Some(front) = outstanding.front() {
                    return Err(SequenceError::DanglingToolCall { id: front.clone() });
                }
                for call in other.tool_calls() {
                    if outstanding.iter().any(|id| id == &call.id) {
                        return Err(SequenceError::DuplicateCallId {
                            id: call.id.clone(),
                        });
                    }
                    outstanding.push_back(call.id.clone());
                }
            }
        }
    }

    if let Some(front) = outstanding.front() {
        return Err(SequenceError::DanglingToolCall { id: front.clone() });
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
