// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Wire-format boundary for the chat-completions and responses dialects.
//!
//! The flat internal tool-call form (`ToolCallRecord { id, name, arguments }`)
//! is translated to the nested `{function: {name, arguments}}` shape here and
//! nowhere else.  SSE events can be split across TCP packets, so a persistent
//! line buffer is maintained across chunks and only complete lines parse.

use serde_json::{json, Value};

use crate::types::{Endpoint, Message, RequestOptions, Sampler};

/// One decoded streaming frame, dialect-independent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WireEvent {
    TextDelta(String),
    ReasoningDelta(String),
    /// A fragment of one tool call, routed by the server-supplied index.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Usage(UsageFrame),
    Finish(String),
    ResponseId(String),
    /// Server-reported error delivered inside the stream body.
    StreamError(String),
    Done,
}

/// Raw numbers from a server usage frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct UsageFrame {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cached_tokens: u32,
    pub total_tokens: Option<u32>,
}

// ─── Request bodies ───────────────────────────────────────────────────────────

fn sampler_into(body: &mut Value, sampler: &Sampler, max_tokens_key: &str) {
    if let Some(t) = sampler.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = sampler.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(k) = sampler.top_k {
        body["top_k"] = json!(k);
    }
    if let Some(p) = sampler.min_p {
        body["min_p"] = json!(p);
    }
    if let Some(n) = sampler.max_new_tokens {
        body[max_tokens_key] = json!(n);
    }
}

/// Build the `/chat/completions` request body.
pub(crate) fn build_chat_body(
    model: &str,
    messages: &[Message],
    sampler: &Sampler,
    opts: &RequestOptions,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": chat_messages(messages),
    });
    sampler_into(&mut body, sampler, "max_tokens");
    if !opts.tools.is_empty() {
        let tools: Vec<Value> = opts
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = json!(tools);
        if let Some(choice) = &opts.tool_choice {
            body["tool_choice"] = json!(choice);
        }
    }
    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    body
}

/// Serialize messages to the chat-completions array.
pub(crate) fn chat_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| match m {
            Message::System { content } => json!({ "role": "system", "content": content }),
            Message::User { content } => json!({ "role": "user", "content": content }),
            Message::Assistant {
                content,
                tool_calls,
                ..
            } => {
                let mut v = json!({ "role": "assistant", "content": content });
                if !tool_calls.is_empty() {
                    let calls: Vec<Value> = tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": { "name": c.name, "arguments": c.arguments },
                            })
                        })
                        .collect();
                    v["tool_calls"] = json!(calls);
                }
                v
            }
            Message::Tool {
                tool_call_id,
                content,
            } => json!({
                "role": "tool",
                "tool_call_id": tool_call_id,
                "content": content,
            }),
        })
        .collect()
}

/// Build the `/responses` request body.
///
/// When `opts.previous_response_id` is set, only the trailing contiguous run
/// of tool results is sent as `function_call_output` items; the server
/// replays the rest from the referenced response.
pub(crate) fn build_responses_body(
    model: &str,
    messages: &[Message],
    sampler: &Sampler,
    opts: &RequestOptions,
    stream: bool,
) -> Value {
    let input: Vec<Value> = if opts.previous_response_id.is_some() {
        messages
            .iter()
            .rev()
            .take_while(|m| m.is_tool())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .flat_map(responses_items)
            .collect()
    } else {
        messages.iter().flat_map(responses_items).collect()
    };

    let mut body = json!({
        "model": model,
        "input": input,
    });
    sampler_into(&mut body, sampler, "max_output_tokens");
    if let Some(prev) = &opts.previous_response_id {
        body["previous_response_id"] = json!(prev);
    }
    if !opts.tools.is_empty() {
        let tools: Vec<Value> = opts
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        body["tools"] = json!(tools);
        if let Some(choice) = &opts.tool_choice {
            body["tool_choice"] = json!(choice);
        }
    }
    if stream {
        body["stream"] = json!(true);
    }
    body
}

/// One message may expand into several responses-endpoint input items.
fn responses_items(m: &Message) -> Vec<Value> {
    match m {
        Message::System { content } => vec![json!({ "role": "system", "content": content })],
        Message::User { content } => vec![json!({ "role": "user", "content": content })],
        Message::Assistant {
            content,
            tool_calls,
            ..
        } => {
            let mut items = Vec::new();
            if !content.is_empty() {
                items.push(json!({ "role": "assistant", "content": content }));
            }
            for c in tool_calls {
                items.push(json!({
                    "type": "function_call",
                    "call_id": c.id,
                    "name": c.name,
                    "arguments": c.arguments,
                }));
            }
            items
        }
        Message::Tool {
            tool_call_id,
            content,
        } => vec![json!({
            "type": "function_call_output",
            "call_id": tool_call_id,
            "output": content,
        })],
    }
}

// ─── SSE framing ──────────────────────────────────────────────────────────────

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by the
/// next TCP chunk.  A single SSE event may be split across multiple packets.
pub(crate) fn drain_complete_sse_lines(buf: &mut String, endpoint: Endpoint) -> Vec<WireEvent> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(evs) = parse_sse_data_line(&line, endpoint) {
            events.extend(evs);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line.
///
/// Returns `None` for empty lines, comments, `event:` framing, or
/// unparseable data.
fn parse_sse_data_line(line: &str, endpoint: Endpoint) -> Option<Vec<WireEvent>> {
    let data = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:"))?;
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(vec![WireEvent::Done]);
    }
    let v: Value = serde_json::from_str(data).ok()?;
    match endpoint {
        Endpoint::Chat => Some(parse_chat_chunk(&v)),
        Endpoint::Responses => Some(parse_responses_chunk(&v)),
    }
}

/// Extract a usage frame from a chat-dialect `usage` object.
fn usage_frame(usage: &Value) -> UsageFrame {
    let cached = usage
        .get("prompt_tokens_details")
        .and_then(|d| d.get("cached_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as u32;
    let input = usage["prompt_tokens"]
        .as_u64()
        .or_else(|| usage["input_tokens"].as_u64())
        .unwrap_or(0) as u32;
    let output = usage["completion_tokens"]
        .as_u64()
        .or_else(|| usage["output_tokens"].as_u64())
        .unwrap_or(0) as u32;
    UsageFrame {
        input_tokens: input,
        output_tokens: output,
        cached_tokens: cached,
        total_tokens: usage["total_tokens"].as_u64().map(|t| t as u32),
    }
}

/// Parse one chat-completions streaming frame.
fn parse_chat_chunk(v: &Value) -> Vec<WireEvent> {
    // Error frame — some servers report failures inside the stream body.
    if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
        let msg = err["message"].as_str().unwrap_or("stream error").to_string();
        return vec![WireEvent::StreamError(msg)];
    }

    // Usage-only chunk (stream_options.include_usage)
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return vec![WireEvent::Usage(usage_frame(usage))];
    }

    let choice = &v["choices"][0];
    let mut events = Vec::new();

    if let Some(reason) = choice["finish_reason"].as_str() {
        events.push(WireEvent::Finish(reason.to_string()));
    }

    let delta = &choice["delta"];

    // Tool call deltas — routed by index so parallel calls accumulate into
    // separate slots.
    if let Some(tool_calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for tc in tool_calls {
            events.push(WireEvent::ToolCallDelta {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            });
        }
        return events;
    }

    // Reasoning delta — `reasoning_content` preferred, `reasoning` fallback.
    let reasoning = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(text) = reasoning {
        if !text.is_empty() {
            events.push(WireEvent::ReasoningDelta(text.to_string()));
            return events;
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(WireEvent::TextDelta(text.to_string()));
        }
    }
    events
}

/// Parse one responses-endpoint streaming frame (typed JSON events).
fn parse_responses_chunk(v: &Value) -> Vec<WireEvent> {
    match v["type"].as_str().unwrap_or("") {
        "response.output_text.delta" => {
            let text = v["delta"].as_str().unwrap_or("");
            if text.is_empty() {
                vec![]
            } else {
                vec![WireEvent::TextDelta(text.to_string())]
            }
        }
        "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
            let text = v["delta"].as_str().unwrap_or("");
            if text.is_empty() {
                vec![]
            } else {
                vec![WireEvent::ReasoningDelta(text.to_string())]
            }
        }
        "response.output_item.added" => {
            let item = &v["item"];
            if item["type"].as_str() == Some("function_call") {
                vec![WireEvent::ToolCallDelta {
                    index: v["output_index"].as_u64().unwrap_or(0) as u32,
                    id: item["call_id"].as_str().unwrap_or("").to_string(),
                    name: item["name"].as_str().unwrap_or("").to_string(),
                    arguments: item["arguments"].as_str().unwrap_or("").to_string(),
                }]
            } else {
                vec![]
            }
        }
        "response.function_call_arguments.delta" => vec![WireEvent::ToolCallDelta {
            index: v["output_index"].as_u64().unwrap_or(0) as u32,
            id: String::new(),
            name: String::new(),
            arguments: v["delta"].as_str().unwrap_or("").to_string(),
        }],
        "response.completed" => {
            let resp = &v["response"];
            let mut events = Vec::new();
            if let Some(id) = resp["id"].as_str() {
                events.push(WireEvent::ResponseId(id.to_string()));
            }
            if let Some(usage) = resp.get("usage").filter(|u| !u.is_null()) {
                events.push(WireEvent::Usage(usage_frame(usage)));
            }
            events.push(WireEvent::Done);
            events
        }
        "response.failed" => {
            let msg = v["response"]["error"]["message"]
                .as_str()
                .unwrap_or("response failed")
                .to_string();
            vec![WireEvent::StreamError(msg)]
        }
        _ => vec![],
    }
}

// ─── Unary responses ──────────────────────────────────────────────────────────

/// Decoded unary response body, dialect-independent.
#[derive(Debug, Default)]
pub(crate) struct UnaryResponse {
    pub text: String,
    pub reasoning: String,
    pub tool_calls: Vec<(u32, String, String, String)>, // (index, id, name, args)
    pub usage: Option<UsageFrame>,
    pub finish_reason: Option<String>,
    pub response_id: Option<String>,
    pub model: Option<String>,
}

pub(crate) fn parse_unary(v: &Value, endpoint: Endpoint) -> UnaryResponse {
    match endpoint {
        Endpoint::Chat => parse_unary_chat(v),
        Endpoint::Responses => parse_unary_responses(v),
    }
}

fn parse_unary_chat(v: &Value) -> UnaryResponse {
    let mut out = UnaryResponse {
        model: v["model"].as_str().map(str::to_string),
        usage: v.get("usage").filter(|u| !u.is_null()).map(usage_frame),
        ..UnaryResponse::default()
    };
    let choice = &v["choices"][0];
    out.finish_reason = choice["finish_reason"].as_str().map(str::to_string);
    let message = &choice["message"];
    if let Some(text) = message["content"].as_str() {
        out.text = text.to_string();
    }
    if let Some(text) = message["reasoning_content"]
        .as_str()
        .or_else(|| message["reasoning"].as_str())
    {
        out.reasoning = text.to_string();
    }
    if let Some(calls) = message["tool_calls"].as_array() {
        for (i, tc) in calls.iter().enumerate() {
            out.tool_calls.push((
                i as u32,
                tc["id"].as_str().unwrap_or("").to_string(),
                tc["function"]["name"].as_str().unwrap_or("").to_string(),
                tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            ));
        }
    }
    out
}

fn parse_unary_responses(v: &Value) -> UnaryResponse {
    let mut out = UnaryResponse {
        model: v["model"].as_str().map(str::to_string),
        response_id: v["id"].as_str().map(str::to_string),
        usage: v.get("usage").filter(|u| !u.is_null()).map(usage_frame),
        finish_reason: v["status"].as_str().map(str::to_string),
        ..UnaryResponse::default()
    };
    if let Some(items) = v["output"].as_array() {
        for (i, item) in items.iter().enumerate() {
            match item["type"].as_str().unwrap_or("") {
                "message" => {
                    if let Some(parts) = item["content"].as_array() {
                        for part in parts {
                            if part["type"].as_str() == Some("output_text") {
                                out.text.push_str(part["text"].as_str().unwrap_or(""));
                            }
                        }
                    }
                }
                "reasoning" => {
                    if let Some(parts) = item["summary"].as_array() {
                        for part in parts {
                            out.reasoning.push_str(part["text"].as_str().unwrap_or(""));
                        }
                    }
                }
                "function_call" => {
                    out.tool_calls.push((
                        i as u32,
                        item["call_id"].as_str().unwrap_or("").to_string(),
                        item["name"].as_str().unwrap_or("").to_string(),
                        item["arguments"].as_str().unwrap_or("").to_string(),
                    ));
                }
                _ => {}
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
