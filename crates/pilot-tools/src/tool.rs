// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Ceiling in display columns for any single string field of a tool result.
const FIELD_DISPLAY_LIMIT: usize = 10_000;

/// Per-tool default approval level.  The controller may elevate `Auto` to a
/// mandatory prompt (destructive shell commands) and the user may promote a
/// tool to auto-approved for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Run without asking
    Auto,
    /// Ask before each invocation
    Ask,
}

/// A single tool invocation requested by the model, with parsed arguments.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Call id; minted locally when the server omitted one
    pub id: String,
    pub name: String,
    /// Parsed JSON argument object
    pub args: Value,
}

/// The result of executing a tool.
///
/// `content` is the serialized result object — always `{name, ok, error?}`
/// plus tool-specific fields — exactly as it is appended to the conversation
/// trace.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    /// Wrap a result object, applying per-field display truncation.
    pub fn from_result(call_id: impl Into<String>, result: Value) -> Self {
        let is_error = result["ok"].as_bool() == Some(false);
        let truncated = truncate_result_fields(result);
        Self {
            call_id: call_id.into(),
            content: serde_json::to_string(&truncated)
                .unwrap_or_else(|_| "{\"ok\":false,\"error\":\"unserializable result\"}".into()),
            is_error,
        }
    }

    /// Error result in the standard shape.
    pub fn err(call_id: impl Into<String>, name: &str, msg: impl Into<String>) -> Self {
        let result = serde_json::json!({ "name": name, "ok": false, "error": msg.into() });
        Self::from_result(call_id, result)
    }
}

/// Trait every builtin tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object
    fn parameters_schema(&self) -> Value;
    fn default_policy(&self) -> ApprovalPolicy;
    /// Execute the tool.  Failures are reported through the result object
    /// (`ok: false`), never by panicking.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Field truncation ─────────────────────────────────────────────────────────

/// Truncate oversized string fields of a result object.
///
/// Any top-level string field wider than 10,000 display columns is cut at a
/// character boundary (multi-byte characters are never split) and the object
/// is annotated with `truncated: true` and `total_bytes` — the byte length of
/// the original field content.
pub fn truncate_result_fields(mut result: Value) -> Value {
    let Value::Object(map) = &mut result else {
        return result;
    };
    let mut total_bytes: usize = 0;
    let mut any_truncated = false;
    for (_k, v) in map.iter_mut() {
        if let Value::String(s) = v {
            if UnicodeWidthStr::width(s.as_str()) > FIELD_DISPLAY_LIMIT {
                total_bytes += s.len();
                *s = truncate_display_width(s, FIELD_DISPLAY_LIMIT);
                any_truncated = true;
            }
        }
    }
    if any_truncated {
        map.insert("truncated".into(), Value::Bool(true));
        map.insert("total_bytes".into(), Value::from(total_bytes));
    }
    result
}

/// Longest prefix of `s` whose display width does not exceed `max_cols`.
pub fn truncate_display_width(s: &str, max_cols: usize) -> String {
    let mut width = 0usize;
    let mut end = 0usize;
    for (i, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w > max_cols {
            break;
        }
        width += w;
        end = i + c.len_utf8();
    }
    s[..end].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_fields_pass_through_untouched() {
        let r = truncate_result_fields(json!({ "name": "read", "ok": true, "content": "hello" }));
        assert_eq!(r["content"], "hello");
        assert!(r.get("truncated").is_none());
        assert!(r.get("total_bytes").is_none());
    }

    #[test]
    fn truncation_triggers_strictly_above_the_limit() {
        let exactly = "x".repeat(10_000);
        let r = truncate_result_fields(json!({ "name": "t", "ok": true, "content": exactly }));
        assert!(r.get("truncated").is_none(), "exactly 10,000 columns must not truncate");

        let over = "x".repeat(10_001);
        let r = truncate_result_fields(json!({ "name": "t", "ok": true, "content": over }));
        assert_eq!(r["truncated"], true);
        assert_eq!(r["total_bytes"], 10_001);
        assert_eq!(r["content"].as_str().unwrap().len(), 10_000);
    }

    #[test]
    fn total_bytes_reports_bytes_not_columns() {
        // 'é' is 2 bytes, 1 column.  10,001 of them exceed the column limit;
        // total_bytes must be the byte length of the original.
        let s = "é".repeat(10_001);
        let r = truncate_result_fields(json!({ "name": "t", "ok": true, "content": s.clone() }));
        assert_eq!(r["truncated"], true);
        assert_eq!(r["total_bytes"], s.len());
    }

    #[test]
    fn wide_characters_are_never_split() {
        // '你' is 3 bytes, 2 columns → 5,001 of them = 10,002 columns.
        let s = "你".repeat(5_001);
        let r = truncate_result_fields(json!({ "name": "t", "ok": true, "content": s }));
        let kept = r["content"].as_str().unwrap();
        assert_eq!(kept.chars().count(), 5_000);
        assert!(kept.chars().all(|c| c == '你'), "no partial characters");
    }

    #[test]
    fn truncate_display_width_respects_column_budget() {
        assert_eq!(truncate_display_width("abcdef", 3), "abc");
        // Two-column glyphs: budget 3 fits only one of them.
        assert_eq!(truncate_display_width("你你", 3), "你");
        assert_eq!(truncate_display_width("", 5), "");
    }

    #[test]
    fn from_result_flags_errors() {
        let out = ToolOutput::from_result("c1", json!({ "name": "shell", "ok": false, "error": "boom" }));
        assert!(out.is_error);
        assert!(out.content.contains("boom"));

        let ok = ToolOutput::from_result("c1", json!({ "name": "shell", "ok": true }));
        assert!(!ok.is_error);
    }

    #[test]
    fn err_helper_produces_standard_shape() {
        let out = ToolOutput::err("c9", "edit", "old_text not found");
        assert!(out.is_error);
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["name"], "edit");
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "old_text not found");
    }

    #[test]
    fn non_string_fields_are_ignored_by_truncation() {
        let r = truncate_result_fields(json!({ "name": "t", "ok": true, "lines": 12345 }));
        assert_eq!(r["lines"], 12345);
        assert!(r.get("truncated").is_none());
    }
}
