// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{ApprovalPolicy, Tool, ToolCall, ToolOutput};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write a file to the local filesystem, overwriting any existing file\n\
         at the given path. Parent directories are created automatically.\n\
         Prefer the edit tool for changing existing files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filepath": {
                    "type": "string",
                    "description": "Absolute or relative path to the file"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["filepath", "content"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let filepath = match call.args.get("filepath").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "write", "missing required parameter 'filepath'"),
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "write", "missing required parameter 'content'"),
        };

        debug!(path = %filepath, bytes = content.len(), "write tool");

        if let Some(parent) = std::path::Path::new(&filepath).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
        }

        match tokio::fs::write(&filepath, &content).await {
            Ok(_) => ToolOutput::from_result(
                &call.id,
                json!({
                    "name": "write",
                    "ok": true,
                    "filepath": filepath,
                    "bytes_written": content.len(),
                }),
            ),
            Err(e) => ToolOutput::err(&call.id, "write", format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
