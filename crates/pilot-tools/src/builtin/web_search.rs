// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{ApprovalPolicy, Tool, ToolCall, ToolOutput};

const DEFAULT_RESULT_COUNT: usize = 5;

#[derive(Default)]
pub struct WebSearchTool {
    /// Optional token override (falls back to env LINKUP_API_TOKEN)
    pub api_token: Option<String>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Real-time web search via the Linkup API. Requires LINKUP_API_TOKEN.\n\
         Include the current year in queries for recent information.\n\
         Always cite sources after answering:\n\
         Sources:\n\
         - [Title](URL)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results to return (default 5, max 10)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match call.args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q.to_string(),
            None => return ToolOutput::err(&call.id, "web_search", "missing required parameter 'query'"),
        };
        let count = call
            .args
            .get("count")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_RESULT_COUNT as u64)
            .min(10) as usize;

        debug!(query = %query, count, "web_search tool");

        let token = self
            .api_token
            .clone()
            .or_else(|| std::env::var("LINKUP_API_TOKEN").ok());
        let Some(token) = token else {
            return ToolOutput::err(
                &call.id,
                "web_search",
                "no Linkup API token configured; set the LINKUP_API_TOKEN environment variable",
            );
        };

        match linkup_search(&query, count, &token).await {
            Ok(results) => ToolOutput::from_result(
                &call.id,
                json!({ "name": "web_search", "ok": true, "query": query, "results": results }),
            ),
            Err(e) => ToolOutput::err(&call.id, "web_search", format!("search error: {e}")),
        }
    }
}

async fn linkup_search(query: &str, count: usize, token: &str) -> anyhow::Result<Vec<Value>> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .user_agent("pilot-agent/0.4")
        .build()?;

    let resp = client
        .post("https://api.linkup.so/v1/search")
        .bearer_auth(token)
        .json(&json!({
            "q": query,
            "depth": "standard",
            "outputType": "searchResults",
        }))
        .send()
        .await?;

    if !resp.status().is_success() {
        anyhow::bail!("Linkup API returned status {}", resp.status());
    }

    let body: Value = resp.json().await?;
    let results = body["results"]
        .as_array()
        .map(|arr| arr.as_slice())
        .unwrap_or(&[]);

    Ok(results
        .iter()
        .take(count)
        .map(|r| {
            json!({
                "title": r["name"].as_str().or_else(|| r["title"].as_str()).unwrap_or("(no title)"),
                "url": r["url"].as_str().unwrap_or(""),
                "snippet": r["content"].as_str().or_else(|| r["snippet"].as_str()).unwrap_or(""),
            })
        })
        .collect())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn schema_requires_query() {
        let schema = WebSearchTool::default().parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v.as_str() == Some("query")));
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let t = WebSearchTool { api_token: Some("tok".into()) };
        let call = ToolCall { id: "1".into(), name: "web_search".into(), args: json!({}) };
        let out = t.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("query"));
    }

    #[tokio::test]
    async fn missing_token_names_the_env_var() {
        std::env::remove_var("LINKUP_API_TOKEN");
        let t = WebSearchTool { api_token: None };
        let call = ToolCall {
            id: "1".into(),
            name: "web_search".into(),
            args: json!({"query": "rust"}),
        };
        let out = t.execute(&call).await;
        assert!(out.is_error);
        assert!(out.content.contains("LINKUP_API_TOKEN"));
    }
}
