// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{ApprovalPolicy, Tool, ToolCall, ToolOutput};

/// Default number of lines returned when the caller does not specify a limit.
const DEFAULT_LINE_LIMIT: usize = 1000;

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read a text file. Returns up to 1000 lines per call.\n\
         Use 'offset' (1-indexed line) and 'limit' to paginate; when the file\n\
         is longer than the window, the result carries a hint with the next\n\
         offset to continue from."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 1000)"
                }
            },
            "required": ["filepath"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let filepath = match call.args.get("filepath").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "read", "missing required parameter 'filepath'"),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        debug!(path = %filepath, offset, limit, "read tool");

        let text = match tokio::fs::read_to_string(&filepath).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, "read", format!("read error: {e}")),
        };

        let all_lines: Vec<&str> = text.lines().collect();
        let total_lines = all_lines.len();
        let start = offset - 1;
        let window: Vec<&str> = all_lines.iter().skip(start).take(limit).copied().collect();
        let shown = window.len();
        let content = window.join("\n");

        let mut result = json!({
            "name": "read",
            "ok": true,
            "filepath": filepath,
            "content": content,
            "total_lines": total_lines,
        });
        if offset > 1 {
            result["offset"] = json!(offset);
        }
        let last_shown = start + shown;
        if last_shown < total_lines {
            result["hint"] = json!(format!(
                "showing lines {}-{} of {}; call read again with offset={} to continue",
                offset,
                last_shown,
                total_lines,
                last_shown + 1
            ));
        }
        ToolOutput::from_result(&call.id, result)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "r1".into(), name: "read".into(), args }
    }

    fn tmp_file(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[tokio::test]
    async fn reads_whole_file_with_line_count() {
        let f = tmp_file("hello\n");
        let out = ReadTool.execute(&call(json!({"filepath": f.path()}))).await;
        assert!(!out.is_error, "{}", out.content);
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["content"], "hello");
        assert_eq!(v["total_lines"], 1);
        assert!(v.get("hint").is_none());
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_window() {
        let f = tmp_file("a\nb\nc\nd\ne\n");
        let out = ReadTool
            .execute(&call(json!({"filepath": f.path(), "offset": 2, "limit": 2})))
            .await;
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["content"], "b\nc");
        assert_eq!(v["offset"], 2);
    }

    #[tokio::test]
    async fn truncated_read_carries_resume_hint() {
        let f = tmp_file("1\n2\n3\n4\n5\n");
        let out = ReadTool
            .execute(&call(json!({"filepath": f.path(), "limit": 2})))
            .await;
        let v: Value = serde_json::from_str(&out.content).unwrap();
        let hint = v["hint"].as_str().unwrap();
        assert!(hint.contains("offset=3"), "hint should name the next offset: {hint}");
        assert_eq!(v["total_lines"], 5);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let out = ReadTool
            .execute(&call(json!({"filepath": "/tmp/pilot_no_such_file_xyz.txt"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("read error"));
    }

    #[tokio::test]
    async fn missing_filepath_is_an_error() {
        let out = ReadTool.execute(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("filepath"));
    }

    #[tokio::test]
    async fn offset_past_end_returns_empty_content() {
        let f = tmp_file("one\n");
        let out = ReadTool
            .execute(&call(json!({"filepath": f.path(), "offset": 10})))
            .await;
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["ok"], true);
        assert_eq!(v["content"], "");
        assert!(v.get("hint").is_none());
    }
}
