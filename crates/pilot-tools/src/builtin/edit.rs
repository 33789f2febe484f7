// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{ApprovalPolicy, Tool, ToolCall, ToolOutput};

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Replace one exact occurrence of 'old_text' with 'new_text' in a file.\n\
         old_text must match the file content exactly (including whitespace)\n\
         and must appear exactly once; include enough surrounding lines to\n\
         make it unique. Re-read the file after a previous edit before\n\
         writing new context."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to replace; must occur exactly once"
                },
                "new_text": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["filepath", "old_text", "new_text"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let filepath = match call.args.get("filepath").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "edit", "missing required parameter 'filepath'"),
        };
        let old_text = match call.args.get("old_text").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "edit", "missing required parameter 'old_text'"),
        };
        let new_text = match call.args.get("new_text").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "edit", "missing required parameter 'new_text'"),
        };
        if old_text.is_empty() {
            return ToolOutput::err(&call.id, "edit", "old_text must not be empty");
        }

        debug!(path = %filepath, "edit tool");

        let content = match tokio::fs::read_to_string(&filepath).await {
            Ok(c) => c,
            Err(e) => return ToolOutput::err(&call.id, "edit", format!("read error: {e}")),
        };

        let occurrences = content.matches(&old_text).count();
        match occurrences {
            0 => {
                return ToolOutput::err(
                    &call.id,
                    "edit",
                    "old_text not found in file; re-read the file and use its exact current content",
                )
            }
            1 => {}
            n => {
                return ToolOutput::err(
                    &call.id,
                    "edit",
                    format!("old_text appears {n} times; include surrounding lines to make it unique"),
                )
            }
        }

        let pos = content.find(&old_text).expect("occurrence counted above");
        let line = content[..pos].matches('\n').count() + 1;
        let new_content = content.replacen(&old_text, &new_text, 1);

        match tokio::fs::write(&filepath, &new_content).await {
            Ok(_) => ToolOutput::from_result(
                &call.id,
                json!({
                    "name": "edit",
                    "ok": true,
                    "filepath": filepath,
                    "line": line,
                }),
            ),
            Err(e) => ToolOutput::err(&call.id, "edit", format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: serde_json::Value) -> ToolCall {
        ToolCall { id: "e1".into(), name: "edit".into(), args }
    }

    fn tmp_file(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[tokio::test]
    async fn single_occurrence_is_replaced_and_line_reported() {
        let f = tmp_file("fn a() {}\nfn b() { old(); }\nfn c() {}\n");
        let out = EditTool
            .execute(&call(json!({
                "filepath": f.path(),
                "old_text": "old();",
                "new_text": "new();"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["line"], 2, "1-indexed replacement line");
        let result = std::fs::read_to_string(f.path()).unwrap();
        assert!(result.contains("new();"));
        assert!(!result.contains("old();"));
    }

    #[tokio::test]
    async fn replacement_on_first_line_reports_line_one() {
        let f = tmp_file("alpha beta\n");
        let out = EditTool
            .execute(&call(json!({
                "filepath": f.path(),
                "old_text": "alpha",
                "new_text": "gamma"
            })))
            .await;
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["line"], 1);
    }

    #[tokio::test]
    async fn absent_old_text_yields_not_found_error() {
        let f = tmp_file("hello\n");
        let out = EditTool
            .execute(&call(json!({
                "filepath": f.path(),
                "old_text": "missing",
                "new_text": "x"
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("not found"), "{}", out.content);
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "hello\n", "file untouched");
    }

    #[tokio::test]
    async fn ambiguous_old_text_yields_distinct_error() {
        let f = tmp_file("dup\ndup\n");
        let out = EditTool
            .execute(&call(json!({
                "filepath": f.path(),
                "old_text": "dup",
                "new_text": "x"
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("appears 2 times"), "{}", out.content);
        assert!(!out.content.contains("not found"), "the two failures are distinct");
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "dup\ndup\n");
    }

    #[tokio::test]
    async fn multiline_old_text_is_supported() {
        let f = tmp_file("one\ntwo\nthree\nfour\n");
        let out = EditTool
            .execute(&call(json!({
                "filepath": f.path(),
                "old_text": "two\nthree",
                "new_text": "2\n3"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["line"], 2);
        assert_eq!(std::fs::read_to_string(f.path()).unwrap(), "one\n2\n3\nfour\n");
    }

    #[tokio::test]
    async fn empty_old_text_is_rejected() {
        let f = tmp_file("content\n");
        let out = EditTool
            .execute(&call(json!({
                "filepath": f.path(),
                "old_text": "",
                "new_text": "x"
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("must not be empty"));
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let out = EditTool
            .execute(&call(json!({
                "filepath": "/tmp/pilot_no_such_edit_file.txt",
                "old_text": "a",
                "new_text": "b"
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("read error"));
    }
}
