// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Pre-flight message-sequence violations, detected before any network I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// An assistant message declared tool calls that were never answered
    /// before the next non-tool message (or the end of the sequence).
    #[error("dangling tool call: {id}")]
    DanglingToolCall { id: String },

    /// A tool message references a call id that is not outstanding.
    #[error("unknown tool call id: {id}")]
    UnknownToolCallId { id: String },

    /// The same call id was declared more than once in the outstanding set.
    #[error("duplicate call id: {id}")]
    DuplicateCallId { id: String },

    /// Roles appear in an order the wire dialect does not accept, e.g. a
    /// system message after index 0 or tool results out of declaration order.
    #[error("invalid role ordering at message {index}: {detail}")]
    InvalidRoleOrdering { index: usize, detail: String },
}

/// Transport-level failures.
///
/// Cancellation is not represented here: a cancelled call returns a normal
/// [`crate::ChatResponse`] with its `cancelled` flag set.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    /// Non-success HTTP status after retries were exhausted.
    #[error("server returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("response decode failed: {0}")]
    Decode(String),

    #[error("stream error: {0}")]
    Sse(String),

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

impl TransportError {
    /// Retries apply only to rate limiting and server-side failures.
    pub fn is_retryable_status(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }
}
