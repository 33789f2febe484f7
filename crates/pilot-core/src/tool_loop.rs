// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The multi-step tool loop: model call → approval → execution → repeat.
//!
//! The loop mutates the working message list in place so every inner request
//! sees a valid sequence.  Modified approvals replace the persisted call
//! arguments before execution; denials append the error text as the tool
//! result and continue; aborts unwind the trailing partial group so the list
//! stays consistent for the caller.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use pilot_model::{
    ChatResponse, ChatTransport, Endpoint, Message, RequestOptions, Sampler, StreamHandler,
    ToolCallRecord, TransportError, Usage,
};
use pilot_tools::{ToolCall, ToolOutput, ToolRegistry};

/// Options for one [`run_tool_loop`] invocation.
#[derive(Clone, Default)]
pub struct LoopOptions {
    /// Catalog names this turn may call; resolved against the registry.
    pub tools: Vec<String>,
    /// Pre-resolved schemas; skips the registry lookup when set.
    pub tool_objects: Option<Vec<pilot_model::ToolSpec>>,
    /// When false the loop returns after one round without dispatching.
    pub execute_tools: bool,
    /// Hard cap on assistant↔tool rounds.
    pub max_steps: u32,
    pub stream: bool,
    pub endpoint: Endpoint,
    pub is_cancelled: Option<pilot_model::CancelCheck>,
    /// Response id recorded from a prior loop invocation (responses endpoint
    /// only).  Referenced via `previous_response_id` whenever the message
    /// tail is a contiguous run of tool results.
    pub previous_response_id: Option<String>,
}

/// One approval decision, produced by [`LoopHandler::on_tool_call`].
#[derive(Debug, Clone)]
pub enum Decision {
    /// Execute the call as-is
    Allow,
    /// Replace the call (user-edited arguments), then execute
    Modify(ToolCallRecord),
    /// Skip execution; the error text becomes the tool result
    Deny { error: String },
    /// Stop the loop
    Abort,
    /// Stop the loop and hand the message back as the next user input
    AbortWithMessage(String),
}

/// Loop-level callbacks layered over the transport's [`StreamHandler`].
#[async_trait]
pub trait LoopHandler: StreamHandler {
    /// Consulted before each tool call executes, in declaration order.
    async fn on_tool_call(
        &mut self,
        call: &ToolCallRecord,
        index: usize,
        response: &ChatResponse,
    ) -> Decision;

    /// Informational; fired after a tool call was executed or denied.
    async fn on_tool_result(&mut self, _call: &ToolCallRecord, _output: &ToolOutput, _is_error: bool) {}

    /// Fired when the loop skips an unknown tool or a malformed call.
    async fn on_tool_warning(&mut self, _message: &str, _call: Option<&ToolCallRecord>) {}
}

/// Drive up to `opts.max_steps` assistant rounds against `transport`,
/// executing approved tool calls from `registry` and appending the trace to
/// `messages`.
///
/// The returned response is the final assistant response with
/// `usage` replaced by the cumulative usage across every inner request;
/// `ctx` still reflects only the last request.
pub async fn run_tool_loop<H: LoopHandler>(
    transport: &dyn ChatTransport,
    model: &str,
    messages: &mut Vec<Message>,
    sampler: &Sampler,
    registry: &ToolRegistry,
    opts: &LoopOptions,
    handler: &mut H,
) -> Result<ChatResponse, TransportError> {
    let request_opts = RequestOptions {
        tools: resolve_tool_specs(registry, opts),
        tool_choice: None,
        endpoint: opts.endpoint,
        is_cancelled: opts.is_cancelled.clone(),
        previous_response_id: None,
    };

    let mut cumulative = Usage::default();
    let mut id_counter: u32 = 0;
    let max_steps = opts.max_steps.max(1);
    // The most recent response id seen, seeded from the caller.  Inner
    // rounds reference it so the server replays context instead of
    // receiving the full input again.
    let mut last_response_id = opts.previous_response_id.clone();

    for step in 0..max_steps {
        let mut req_opts = request_opts.clone();
        if opts.endpoint == Endpoint::Responses {
            req_opts.previous_response_id =
                previous_response_id(messages, last_response_id.as_deref());
        }

        let mut response = if opts.stream {
            transport
                .stream(model, messages, sampler, &mut *handler, &req_opts)
                .await?
        } else {
            transport.complete(model, messages, sampler, &req_opts).await?
        };
        cumulative.add(&response.usage);
        if let Some(id) = &response.response_id {
            last_response_id = Some(id.clone());
        }

        if response.cancelled {
            response.usage = cumulative;
            return Ok(response);
        }

        // Terminal round: no tool calls — commit the assistant text.
        if response.tool_calls.is_empty() {
            messages.push(Message::Assistant {
                content: response.text.clone(),
                reasoning: none_if_empty(&response.reasoning_text),
                tool_calls: Vec::new(),
            });
            response.usage = cumulative;
            return Ok(response);
        }

        // Mint ids for calls the server delivered without one.
        let mut calls = response.tool_calls.clone();
        for call in &mut calls {
            if call.id.is_empty() {
                call.id = mint_call_id(&mut id_counter);
            }
        }
        response.tool_calls = calls.clone();

        if !opts.execute_tools {
            response.usage = cumulative;
            return Ok(response);
        }

        messages.push(Message::Assistant {
            content: response.text.clone(),
            reasoning: none_if_empty(&response.reasoning_text),
            tool_calls: calls.clone(),
        });

        let mut answered = 0usize;
        let mut abort: Option<Option<String>> = None;

        for (index, call) in calls.iter().enumerate() {
            let decision = handler.on_tool_call(call, index, &response).await;
            let effective = match decision {
                Decision::Abort => {
                    abort = Some(None);
                    break;
                }
                Decision::AbortWithMessage(msg) => {
                    abort = Some(Some(msg));
                    break;
                }
                Decision::Deny { error } => {
                    debug!(tool = %call.name, id = %call.id, "tool call denied");
                    let output = ToolOutput::err(&call.id, &call.name, &error);
                    messages.push(Message::tool_result(&call.id, &output.content));
                    answered += 1;
                    handler.on_tool_result(call, &output, true).await;
                    continue;
                }
                Decision::Allow => call.clone(),
                Decision::Modify(new_call) => {
                    // The persisted trace carries the modified call.
                    replace_persisted_call(messages, &call.id, &new_call);
                    new_call
                }
            };

            let output = dispatch(registry, &effective, handler).await;
            messages.push(Message::tool_result(&effective.id, &output.content));
            answered += 1;
            let is_error = output.is_error;
            handler.on_tool_result(&effective, &output, is_error).await;
        }

        if let Some(abort_message) = abort {
            unwind_partial_group(messages, answered);
            response.aborted = true;
            response.abort_message = abort_message;
            response.usage = cumulative;
            return Ok(response);
        }

        debug!(step, tool_rounds = step + 1, "tool round complete");
    }

    // Step budget exhausted: re-enter once more without tools is not allowed
    // by the contract; return the last state with a synthetic warning.
    let mut response = ChatResponse {
        usage: cumulative,
        model: model.to_string(),
        ..ChatResponse::default()
    };
    response.warning = Some(format!(
        "tool loop stopped after reaching the maximum of {max_steps} steps"
    ));
    Ok(response)
}

/// Execute one call, downgrading malformed arguments and unknown tools to
/// error results so every declared call id receives an answer.
async fn dispatch<H: LoopHandler>(
    registry: &ToolRegistry,
    call: &ToolCallRecord,
    handler: &mut H,
) -> ToolOutput {
    if registry.get(&call.name).is_none() {
        let msg = format!("unknown tool: {}", call.name);
        warn!(tool = %call.name, "skipping unknown tool");
        handler.on_tool_warning(&msg, Some(call)).await;
        return ToolOutput::err(&call.id, &call.name, msg);
    }
    let args: Value = match serde_json::from_str(&call.arguments) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("malformed tool arguments: {e}");
            warn!(tool = %call.name, error = %e, "skipping malformed call");
            handler.on_tool_warning(&msg, Some(call)).await;
            return ToolOutput::err(&call.id, &call.name, msg);
        }
    };
    registry
        .execute(&ToolCall { id: call.id.clone(), name: call.name.clone(), args })
        .await
}

/// Swap the declared call inside the trailing assistant message.
fn replace_persisted_call(messages: &mut [Message], call_id: &str, new_call: &ToolCallRecord) {
    if let Some(Message::Assistant { tool_calls, .. }) =
        messages.iter_mut().rev().find(|m| !m.is_tool())
    {
        if let Some(slot) = tool_calls.iter_mut().find(|c| c.id == call_id) {
            *slot = new_call.clone();
        }
    }
}

/// After an abort, shrink the trailing group so declared calls match the
/// answered prefix; a group with no answers is removed entirely.
fn unwind_partial_group(messages: &mut Vec<Message>, answered: usize) {
    let Some(assistant_idx) = messages.iter().rposition(|m| !m.is_tool()) else {
        return;
    };
    if answered == 0 {
        messages.truncate(assistant_idx);
        return;
    }
    if let Message::Assistant { tool_calls, .. } = &mut messages[assistant_idx] {
        tool_calls.truncate(answered);
    }
}

fn resolve_tool_specs(registry: &ToolRegistry, opts: &LoopOptions) -> Vec<pilot_model::ToolSpec> {
    if let Some(objects) = &opts.tool_objects {
        return objects.clone();
    }
    registry
        .schemas_for(&opts.tools)
        .into_iter()
        .map(|s| pilot_model::ToolSpec {
            name: s.name,
            description: s.description,
            parameters: s.parameters,
        })
        .collect()
}

/// Responses endpoint: reference the prior response when the tail is a
/// contiguous run of tool results directly following an assistant message
/// that declared the calls.  Anything else (a fresh user turn, a text-only
/// tail) must send full input.
fn previous_response_id(messages: &[Message], last_id: Option<&str>) -> Option<String> {
    let last_id = last_id?;
    let trailing_tools = messages.iter().rev().take_while(|m| m.is_tool()).count();
    if trailing_tools == 0 {
        return None;
    }
    match messages.len().checked_sub(trailing_tools + 1).map(|i| &messages[i]) {
        Some(Message::Assistant { tool_calls, .. }) if !tool_calls.is_empty() => {
            Some(last_id.to_string())
        }
        _ => None,
    }
}

fn none_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Deterministic mint: counter plus a short random suffix.
fn mint_call_id(counter: &mut u32) -> String {
    *counter += 1;
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..4];
    format!("call_{counter}_{suffix}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use pilot_model::{ChunkKind, ScriptedTransport};
    use pilot_tools::builtin_registry;

    use super::*;

    /// Records every callback and plays back scripted decisions.
    struct ScriptedHandler {
        decisions: Vec<Decision>,
        next: usize,
        chunks: String,
        warnings: Vec<String>,
        results: Vec<(String, bool)>,
    }

    impl ScriptedHandler {
        fn allowing() -> Self {
            Self::with_decisions(vec![])
        }
        fn with_decisions(decisions: Vec<Decision>) -> Self {
            Self {
                decisions,
                next: 0,
                chunks: String::new(),
                warnings: Vec::new(),
                results: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl StreamHandler for ScriptedHandler {
        async fn on_chunk(&mut self, kind: ChunkKind, text: &str) {
            if kind == ChunkKind::Output {
                self.chunks.push_str(text);
            }
        }
    }

    #[async_trait]
    impl LoopHandler for ScriptedHandler {
        async fn on_tool_call(
            &mut self,
            _call: &ToolCallRecord,
            _index: usize,
            _response: &ChatResponse,
        ) -> Decision {
            let d = self
                .decisions
                .get(self.next)
                .cloned()
                .unwrap_or(Decision::Allow);
            self.next += 1;
            d
        }
        async fn on_tool_result(&mut self, call: &ToolCallRecord, _output: &ToolOutput, is_error: bool) {
            self.results.push((call.name.clone(), is_error));
        }
        async fn on_tool_warning(&mut self, message: &str, _call: Option<&ToolCallRecord>) {
            self.warnings.push(message.to_string());
        }
    }

    fn opts() -> LoopOptions {
        LoopOptions {
            tools: vec!["read".into(), "shell".into(), "edit".into()],
            tool_objects: None,
            execute_tools: true,
            max_steps: 8,
            stream: true,
            endpoint: Endpoint::Chat,
            is_cancelled: None,
            previous_response_id: None,
        }
    }

    fn registry() -> ToolRegistry {
        builtin_registry(&pilot_config::ToolsConfig::default())
    }

    fn read_call(id: &str, path: &std::path::Path) -> ToolCallRecord {
        ToolCallRecord {
            id: id.into(),
            name: "read".into(),
            arguments: json!({ "filepath": path }).to_string(),
        }
    }

    /// Scenario: one tool call, allowed, then a final text response.
    #[tokio::test]
    async fn happy_path_one_tool_call() {
        let file = {
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"hello").unwrap();
            f
        };
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::tool_call_response(vec![read_call("c1", file.path())]),
            ScriptedTransport::text_response("File says hello."),
        ]);
        let mut messages = vec![Message::system("sys"), Message::user("read it")];
        let mut handler = ScriptedHandler::allowing();

        let resp = run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        assert_eq!(resp.text, "File says hello.");
        assert!(!resp.aborted);
        // conversation: system, user, assistant(calls), tool, assistant(text)
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[2].tool_calls().len(), 1);
        assert!(messages[3].is_tool());
        assert!(messages[3].text().contains("hello"));
        assert_eq!(messages[4].text(), "File says hello.");
        pilot_model::validate_sequence(&messages).unwrap();
        // Usage accumulated over both inner requests.
        assert_eq!(resp.usage.requests, 2);
        assert_eq!(resp.usage.input_tokens, 20);
        assert_eq!(handler.results, vec![("read".to_string(), false)]);
    }

    /// Scenario: abort-with-message before any execution leaves no trace of
    /// the aborted round.
    #[tokio::test]
    async fn abort_with_message_unwinds_untouched_group() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::tool_call_response(vec![
            ToolCallRecord { id: "c1".into(), name: "read".into(), arguments: "{}".into() },
        ])]);
        let mut messages = vec![Message::system("sys"), Message::user("read that")];
        let mut handler = ScriptedHandler::with_decisions(vec![Decision::AbortWithMessage(
            "don't read that, read AGENTS.md".into(),
        )]);

        let resp = run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        assert!(resp.aborted);
        assert_eq!(resp.abort_message.as_deref(), Some("don't read that, read AGENTS.md"));
        assert_eq!(messages.len(), 2, "aborted assistant round is not committed");
        assert!(handler.results.is_empty(), "no tool executed");
        pilot_model::validate_sequence(&messages).unwrap();
    }

    /// Abort after the first of two parallel calls keeps the answered prefix.
    #[tokio::test]
    async fn abort_mid_parallel_group_keeps_answered_prefix() {
        let file = {
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"data").unwrap();
            f
        };
        let transport = ScriptedTransport::new(vec![ScriptedTransport::tool_call_response(vec![
            read_call("c1", file.path()),
            read_call("c2", file.path()),
        ])]);
        let mut messages = vec![Message::user("go")];
        let mut handler =
            ScriptedHandler::with_decisions(vec![Decision::Allow, Decision::Abort]);

        let resp = run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        assert!(resp.aborted);
        assert!(resp.abort_message.is_none());
        // user, assistant(calls truncated to 1), tool(c1)
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].tool_calls().len(), 1);
        pilot_model::validate_sequence(&messages).unwrap();
    }

    /// Deny appends the error text as the tool result and continues.
    #[tokio::test]
    async fn deny_continues_with_error_tool_message() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::tool_call_response(vec![ToolCallRecord {
                id: "c1".into(),
                name: "shell".into(),
                arguments: json!({"command": "ls"}).to_string(),
            }]),
            ScriptedTransport::text_response("understood"),
        ]);
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::with_decisions(vec![Decision::Deny {
            error: "user declined".into(),
        }]);

        let resp = run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        assert!(!resp.aborted);
        assert_eq!(resp.text, "understood");
        assert!(messages[2].is_tool());
        assert!(messages[2].text().contains("user declined"));
        assert_eq!(handler.results, vec![("shell".to_string(), true)]);
        pilot_model::validate_sequence(&messages).unwrap();
    }

    /// Modify replaces the executed and persisted arguments.
    #[tokio::test]
    async fn modify_executes_and_persists_the_edited_call() {
        let file = {
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"real contents").unwrap();
            f
        };
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::tool_call_response(vec![ToolCallRecord {
                id: "c1".into(),
                name: "read".into(),
                arguments: json!({"filepath": "/wrong/path"}).to_string(),
            }]),
            ScriptedTransport::text_response("done"),
        ]);
        let modified = read_call("c1", file.path());
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::with_decisions(vec![Decision::Modify(modified.clone())]);

        run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        // The persisted assistant call carries the modified arguments.
        assert_eq!(messages[1].tool_calls()[0].arguments, modified.arguments);
        // The tool executed against the modified path.
        assert!(messages[2].text().contains("real contents"));
        assert_eq!(handler.results, vec![("read".to_string(), false)]);
    }

    /// Unknown tools answer with an error result and fire a warning.
    #[tokio::test]
    async fn unknown_tool_warns_and_answers_with_error() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::tool_call_response(vec![ToolCallRecord {
                id: "c1".into(),
                name: "teleport".into(),
                arguments: "{}".into(),
            }]),
            ScriptedTransport::text_response("ok"),
        ]);
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::allowing();

        run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        assert_eq!(handler.warnings.len(), 1);
        assert!(handler.warnings[0].contains("unknown tool"));
        assert!(messages[2].text().contains("unknown tool"));
        pilot_model::validate_sequence(&messages).unwrap();
    }

    /// Malformed JSON arguments answer with an error result and a warning.
    #[tokio::test]
    async fn malformed_arguments_warn_and_answer_with_error() {
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::tool_call_response(vec![ToolCallRecord {
                id: "c1".into(),
                name: "read".into(),
                arguments: "{not json".into(),
            }]),
            ScriptedTransport::text_response("ok"),
        ]);
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::allowing();

        run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        assert_eq!(handler.warnings.len(), 1);
        assert!(handler.warnings[0].contains("malformed"));
        pilot_model::validate_sequence(&messages).unwrap();
    }

    /// Missing call ids are minted before anything is persisted.
    #[tokio::test]
    async fn missing_call_ids_are_minted() {
        let file = {
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"x").unwrap();
            f
        };
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::tool_call_response(vec![ToolCallRecord {
                id: String::new(),
                name: "read".into(),
                arguments: json!({"filepath": file.path()}).to_string(),
            }]),
            ScriptedTransport::text_response("ok"),
        ]);
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::allowing();

        run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        let id = &messages[1].tool_calls()[0].id;
        assert!(id.starts_with("call_1_"), "minted id, got {id}");
        assert_eq!(id.len(), "call_1_".len() + 4);
        pilot_model::validate_sequence(&messages).unwrap();
    }

    /// execute_tools=false returns the tool calls without dispatch or trace.
    #[tokio::test]
    async fn execute_tools_false_returns_after_one_round() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::tool_call_response(vec![
            ToolCallRecord { id: "c1".into(), name: "read".into(), arguments: "{}".into() },
        ])]);
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::allowing();
        let mut o = opts();
        o.execute_tools = false;

        let resp = run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &o,
            &mut handler,
        )
        .await
        .unwrap();

        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(messages.len(), 1, "nothing appended");
        assert!(handler.results.is_empty());
    }

    /// Step budget exhaustion returns a synthetic warning.
    #[tokio::test]
    async fn max_steps_exhaustion_sets_warning() {
        let file = {
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"x").unwrap();
            f
        };
        // Every round requests another tool call; the loop must stop at 2.
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::tool_call_response(vec![read_call("a", file.path())]),
            ScriptedTransport::tool_call_response(vec![read_call("b", file.path())]),
            ScriptedTransport::tool_call_response(vec![read_call("c", file.path())]),
        ]);
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::allowing();
        let mut o = opts();
        o.max_steps = 2;

        let resp = run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &o,
            &mut handler,
        )
        .await
        .unwrap();

        assert!(resp.warning.as_deref().unwrap().contains("maximum"));
        assert_eq!(transport.remaining(), 1, "exactly two rounds ran");
        assert_eq!(resp.usage.requests, 2, "cumulative usage covers both rounds");
        pilot_model::validate_sequence(&messages).unwrap();
    }

    /// A cancelled transport response is returned immediately.
    #[tokio::test]
    async fn cancelled_response_returns_immediately() {
        use std::sync::Arc;
        let transport = ScriptedTransport::new(vec![ScriptedTransport::text_response("partial")]);
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::allowing();
        let mut o = opts();
        o.is_cancelled = Some(Arc::new(|| true));

        let resp = run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &o,
            &mut handler,
        )
        .await
        .unwrap();

        assert!(resp.cancelled);
        assert_eq!(resp.text, "partial");
        assert_eq!(messages.len(), 1, "cancelled text is committed by the controller");
    }

    // ── previous_response_id threading (responses endpoint) ───────────────────

    #[test]
    fn previous_id_requires_a_tool_result_tail() {
        let c1 = ToolCallRecord { id: "c1".into(), name: "read".into(), arguments: "{}".into() };
        let after_tools = vec![
            Message::user("q"),
            Message::assistant_with_calls("", vec![c1]),
            Message::tool_result("c1", "out"),
        ];
        assert_eq!(
            previous_response_id(&after_tools, Some("resp_1")),
            Some("resp_1".to_string())
        );

        // A fresh user turn sends full input.
        let fresh_turn = vec![Message::user("q")];
        assert_eq!(previous_response_id(&fresh_turn, Some("resp_1")), None);

        // A text-only tail sends full input too.
        let text_tail = vec![Message::user("q"), Message::assistant("done")];
        assert_eq!(previous_response_id(&text_tail, Some("resp_1")), None);

        // Without a recorded id there is nothing to reference.
        assert_eq!(previous_response_id(&after_tools, None), None);
    }

    /// Inner rounds on the responses endpoint reference the id the prior
    /// round recorded; the first request of a turn sends full input.
    #[tokio::test]
    async fn responses_endpoint_threads_previous_id_between_rounds() {
        let file = {
            use std::io::Write;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"x").unwrap();
            f
        };
        let mut first = ScriptedTransport::tool_call_response(vec![read_call("c1", file.path())]);
        first.response_id = Some("resp_1".into());
        let transport = ScriptedTransport::new(vec![first, ScriptedTransport::text_response("done")]);

        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::allowing();
        let mut o = opts();
        o.endpoint = Endpoint::Responses;

        run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &o,
            &mut handler,
        )
        .await
        .unwrap();

        assert_eq!(
            transport.seen_previous_ids(),
            vec![None, Some("resp_1".to_string())],
            "the second round must reference the first round's response id"
        );
    }

    /// A seed id from a prior invocation is ignored until a tool-result tail
    /// exists, so fresh turns never reference stale responses.
    #[tokio::test]
    async fn seed_id_is_not_sent_for_a_fresh_turn() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::text_response("hi")]);
        let mut messages = vec![Message::user("hello")];
        let mut handler = ScriptedHandler::allowing();
        let mut o = opts();
        o.endpoint = Endpoint::Responses;
        o.previous_response_id = Some("resp_stale".into());

        run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &o,
            &mut handler,
        )
        .await
        .unwrap();

        assert_eq!(transport.seen_previous_ids(), vec![None]);
    }

    /// Streamed chunks reach the handler through the loop.
    #[tokio::test]
    async fn stream_chunks_are_forwarded() {
        let transport = ScriptedTransport::new(vec![ScriptedTransport::text_response("streamed body")]);
        let mut messages = vec![Message::user("go")];
        let mut handler = ScriptedHandler::allowing();

        run_tool_loop(
            &transport,
            "m",
            &mut messages,
            &Sampler::default(),
            &registry(),
            &opts(),
            &mut handler,
        )
        .await
        .unwrap();

        assert_eq!(handler.chunks, "streamed body");
    }
}
