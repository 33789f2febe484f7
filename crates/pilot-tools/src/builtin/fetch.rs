// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{ApprovalPolicy, Tool, ToolCall, ToolOutput};

pub struct FetchTool;

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch content from an http/https URL and convert it to readable text.\n\
         HTML is converted to plain text, JSON is pretty-printed, other\n\
         content is returned as-is. Oversized content is truncated and the\n\
         result notes the original size. Read-only; no authentication."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch (http or https)"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let url = match call.args.get("url").and_then(|v| v.as_str()) {
            Some(u) => u.to_string(),
            None => return ToolOutput::err(&call.id, "fetch", "missing required parameter 'url'"),
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolOutput::err(&call.id, "fetch", "only http and https URLs are supported");
        }

        debug!(url = %url, "fetch tool");

        // The raw converted body goes into the result untrimmed; the shared
        // result-field truncation is the single place output is capped, so
        // its `total_bytes` annotation reflects the true body size.
        match fetch_url(&url).await {
            Ok((content, content_type)) => ToolOutput::from_result(
                &call.id,
                json!({
                    "name": "fetch",
                    "ok": true,
                    "url": url,
                    "content_type": content_type,
                    "content": content,
                }),
            ),
            Err(e) => ToolOutput::err(&call.id, "fetch", format!("fetch error: {e}")),
        }
    }
}

async fn fetch_url(url: &str) -> anyhow::Result<(String, String)> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::limited(3))
        .user_agent("pilot-agent/0.4")
        .build()?;

    let response = client.get(url).send().await?;
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase();

    let body = response.text().await?;

    let content = if content_type.contains("html") {
        html_to_text(&body)
    } else if content_type.contains("json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(v) => serde_json::to_string_pretty(&v).unwrap_or(body),
            Err(_) => body,
        }
    } else {
        body
    };
    Ok((content, content_type))
}

/// Convert HTML to plain text.
fn html_to_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), 100)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
