// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent controller: input loop, turn orchestration, approval wiring and
//! terminal state.
//!
//! One turn flows: append user message → rebuild system prompt → run the tool
//! loop with a fresh stream buffer → persist the tool trace → account usage →
//! trim when the window runs hot → refresh the prompt.

use std::io::Write;

use async_trait::async_trait;
use tracing::warn;

use pilot_config::Config;
use pilot_core::{run_tool_loop, Conversation, Decision, LoopHandler, LoopOptions};
use pilot_model::{
    ChatClient, ChatResponse, ChunkKind, Endpoint, Message, Sampler, StreamHandler,
    ToolCallRecord,
};
use pilot_render::{CancelFlag, Renderer, StreamParser, Term};
use pilot_tools::{ApprovalPolicy, ToolOutput, ToolRegistry};

use crate::approval::{
    args_summary, danger_reason, edit_diff_preview, prompt_user, read_line, ApprovalState,
};
use crate::commands::{handle_command, CommandOutcome};
use crate::sysprompt;

pub struct Controller {
    pub(crate) config: Config,
    pub(crate) client: ChatClient,
    pub(crate) registry: ToolRegistry,
    pub(crate) conversation: Conversation,
    pub(crate) approvals: ApprovalState,
    pub(crate) cancel: CancelFlag,
    pub(crate) term: Term<std::io::Stdout>,
    pub(crate) model: String,
    pub(crate) custom_system_prompt: Option<String>,
    pub(crate) user_prompt: Option<String>,
    /// Response id recorded from the latest turn; lets the responses
    /// endpoint reference prior context instead of resending full input.
    pub(crate) last_response_id: Option<String>,
}

impl Controller {
    pub fn new(config: Config, model_override: Option<String>) -> Self {
        let client = ChatClient::new(&config.model);
        let registry = pilot_tools::builtin_registry(&config.tools);

        // Tools whose default policy is Auto join the configured
        // auto-approve set; destructive shell commands still elevate.
        let mut auto = config.tools.auto_approve.clone();
        for name in registry.names() {
            if let Some(tool) = registry.get(&name) {
                if tool.default_policy() == ApprovalPolicy::Auto && !auto.contains(&name) {
                    auto.push(name);
                }
            }
        }

        let model = model_override.unwrap_or_else(|| config.model.name.clone());
        let conversation = Conversation::new(None, config.model.context_window)
            .with_redaction(config.agent.redact_tool_bytes, config.agent.redact_keep_turns);
        let cancel = CancelFlag::new();
        cancel.spawn_ctrlc_listener();

        Self {
            approvals: ApprovalState::new(&auto),
            client,
            registry,
            conversation,
            cancel,
            term: Term::stdout(),
            model,
            custom_system_prompt: config.agent.system_prompt.clone(),
            user_prompt: None,
            last_response_id: None,
            config,
        }
    }

    /// Interactive REPL; returns on `/quit` or EOF.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        self.term.write_str("pilot — type a request, /help for commands\n");
        loop {
            self.refresh_prompt();
            let line = match read_line() {
                Ok(line) if line.is_empty() => break, // EOF
                Ok(line) => line.trim().to_string(),
                Err(_) => break,
            };
            if line.is_empty() {
                continue;
            }
            if line.starts_with('/') {
                match handle_command(self, &line).await {
                    CommandOutcome::Quit => break,
                    CommandOutcome::Continue => continue,
                }
            }
            self.process_input(line).await;
        }
        Ok(())
    }

    /// Run a single non-interactive turn (one-shot mode).
    pub async fn run_once(&mut self, input: String) -> anyhow::Result<()> {
        self.process_input(input).await;
        Ok(())
    }

    fn sampler(&self) -> Sampler {
        Sampler {
            temperature: self.config.model.temperature,
            top_p: self.config.model.top_p,
            top_k: self.config.model.top_k,
            min_p: self.config.model.min_p,
            max_new_tokens: self.config.model.max_new_tokens,
        }
    }

    fn endpoint(&self) -> Endpoint {
        if self.config.model.responses_endpoint {
            Endpoint::Responses
        } else {
            Endpoint::Chat
        }
    }

    pub(crate) fn build_system_prompt(&self) -> String {
        sysprompt::build(
            self.custom_system_prompt.as_deref(),
            self.user_prompt.as_deref(),
            &self.registry.names(),
        )
    }

    /// Status line + input marker.
    fn refresh_prompt(&mut self) {
        let cost = self.conversation.cost();
        let mut status = format!("[{}", self.model);
        if cost.last_ctx_pct > 0.0 {
            status.push_str(&format!(" | ctx {:.0}%", cost.last_ctx_pct));
        }
        if cost.total_cost > 0.0 {
            status.push_str(&format!(" | ${:.4}", cost.total_cost));
        }
        status.push(']');
        self.term.write_str(&format!("\n\x1b[2m{status}\x1b[0m\n> "));
        self.term.flush();
    }

    pub(crate) fn print_error(&mut self, message: &str) {
        self.term.write_str(&format!("\x1b[91merror:\x1b[0m {message}\n"));
        self.term.flush();
    }

    pub(crate) fn print_info(&mut self, message: &str) {
        self.term.write_str(&format!("\x1b[2m{message}\x1b[0m\n"));
        self.term.flush();
    }

    /// Drive one user turn, re-entering when an approval aborts with a
    /// follow-up message.
    pub(crate) async fn process_input(&mut self, input: String) {
        let mut user_input = input;
        loop {
            // Context guard: a send that would go out with no trimmable
            // history cannot succeed; the user must /clear.
            let pre_ctx_pct = self.conversation.cost().last_ctx_pct;
            if pre_ctx_pct >= self.config.agent.fail_threshold_pct
                && self.conversation.count() <= 2
            {
                self.print_error("context exhausted; use /clear to start over");
                return;
            }

            if let Err(e) = self.conversation.add_user(&user_input) {
                self.print_error(&e.to_string());
                return;
            }
            self.conversation.set_system_prompt(self.build_system_prompt());

            let mut messages = self.conversation.messages_for_api();
            let base_len = messages.len();

            let opts = LoopOptions {
                tools: self.registry.names(),
                tool_objects: None,
                execute_tools: true,
                max_steps: self.config.agent.max_steps,
                stream: true,
                endpoint: self.endpoint(),
                is_cancelled: Some(self.cancel.checker()),
                previous_response_id: self.last_response_id.clone(),
            };
            let sampler = self.sampler();

            let guard = self.cancel.install();
            let mut handler = TurnHandler::new(
                &mut self.term,
                &mut self.approvals,
                self.config.render.clone(),
            );
            let result = run_tool_loop(
                &self.client,
                &self.model,
                &mut messages,
                &sampler,
                &self.registry,
                &opts,
                &mut handler,
            )
            .await;
            drop(guard);
            handler.finish_display();
            drop(handler);

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    self.print_error(&e.to_string());
                    return;
                }
            };
            if let Some(id) = &response.response_id {
                self.last_response_id = Some(id.clone());
            }

            // Persist the tool trace (modify replacements are already applied
            // to the working copy by the loop).
            self.persist_trace(&messages[base_len..]);

            if response.cancelled {
                // Keep whatever streamed before the cancel.
                if !response.text.is_empty() {
                    let _ = self
                        .conversation
                        .add_assistant(&response.text, None, Vec::new());
                }
                self.print_info("cancelled");
                return;
            }

            if response.aborted {
                match response.abort_message.clone() {
                    Some(message) => {
                        user_input = message;
                        continue;
                    }
                    None => {
                        self.print_info("aborted");
                        return;
                    }
                }
            }

            self.account_usage(&response);
            self.trim_if_hot();

            if let Some(warning) = &response.warning {
                self.print_info(warning);
            }
            return;
        }
    }

    /// Copy the loop's appended messages into the conversation.
    fn persist_trace(&mut self, trace: &[Message]) {
        for message in trace {
            let outcome = match message {
                Message::Assistant { content, reasoning, tool_calls } => self
                    .conversation
                    .add_assistant(content, reasoning.clone(), tool_calls.clone()),
                Message::Tool { tool_call_id, content } => {
                    self.conversation.add_tool_result(tool_call_id, content)
                }
                other => {
                    warn!(?other, "unexpected message kind in tool trace");
                    Ok(())
                }
            };
            if let Err(e) = outcome {
                warn!(error = %e, "dropping inconsistent trace message");
            }
        }
    }

    fn account_usage(&mut self, response: &ChatResponse) {
        self.conversation.add_usage(
            response.usage.input_tokens as u64,
            response.usage.output_tokens as u64,
            response.usage.cached_tokens as u64,
            response.ctx,
            self.config.model.context_window,
            self.config.model.prompt_price,
            self.config.model.completion_price,
        );
    }

    /// Trim up to the configured number of oldest turns once the window runs
    /// past the threshold.
    fn trim_if_hot(&mut self) {
        if self.conversation.cost().last_ctx_pct < self.config.agent.trim_threshold_pct {
            return;
        }
        let mut trimmed = 0usize;
        while trimmed < self.config.agent.max_trims_per_turn && self.conversation.trim_oldest_turn()
        {
            trimmed += 1;
        }
        if trimmed > 0 {
            self.print_info(&format!("context at {:.0}%; trimmed {trimmed} oldest turn(s)",
                self.conversation.cost().last_ctx_pct));
        }
    }
}

// ─── Turn handler ─────────────────────────────────────────────────────────────

/// Owns the per-turn display pipeline: stream buffer, renderer, tool lines,
/// thinking indicator, and the approval prompt.
pub struct TurnHandler<'a> {
    term: &'a mut Term<std::io::Stdout>,
    approvals: &'a mut ApprovalState,
    parser: StreamParser,
    renderer: Renderer,
    turn: crate::turnstate::TurnState,
}

impl<'a> TurnHandler<'a> {
    fn new(
        term: &'a mut Term<std::io::Stdout>,
        approvals: &'a mut ApprovalState,
        render_cfg: pilot_config::RenderConfig,
    ) -> Self {
        let width = term.width();
        Self {
            term,
            approvals,
            parser: StreamParser::new(),
            renderer: Renderer::new(render_cfg, width),
            turn: crate::turnstate::TurnState::new(),
        }
    }

    /// Close the stream buffer and renderer at end of turn.
    fn finish_display(&mut self) {
        self.turn.thinking.clear(self.term);
        for event in self.parser.finish() {
            self.renderer.handle(&event, self.term);
        }
        self.renderer.finalize(self.term);
        self.turn.tools.reset();
    }
}

#[async_trait]
impl StreamHandler for TurnHandler<'_> {
    async fn on_chunk(&mut self, kind: ChunkKind, text: &str) {
        match kind {
            ChunkKind::Reasoning => {
                if !self.turn.saw_output {
                    self.turn.thinking.tick(self.term);
                }
            }
            ChunkKind::Output => {
                if self.turn.thinking.is_shown() {
                    self.turn.thinking.clear(self.term);
                }
                if self.turn.tools.active || self.turn.tools.has_sticky() {
                    self.turn.tools.on_text_output(self.term);
                }
                self.turn.saw_output = true;
                for event in self.parser.push_str(text) {
                    self.renderer.handle(&event, self.term);
                }
                self.term.flush();
            }
        }
    }

    async fn on_retry(&mut self, attempt: u32, status: u16) {
        self.turn.thinking.clear(self.term);
        self.term
            .write_str(&format!("\x1b[2mretrying (attempt {attempt}) after HTTP {status}\x1b[0m\n"));
        self.term.flush();
    }

    async fn on_error(&mut self, message: &str) {
        self.turn.thinking.clear(self.term);
        self.term.write_str(&format!("\x1b[91m{message}\x1b[0m\n"));
        self.term.flush();
    }
}

#[async_trait]
impl LoopHandler for TurnHandler<'_> {
    async fn on_tool_call(
        &mut self,
        call: &ToolCallRecord,
        _index: usize,
        _response: &ChatResponse,
    ) -> Decision {
        self.turn.thinking.clear(self.term);

        // Bring the renderer to a known cursor position; separate the tool
        // display from streamed text when any was painted.
        let had_output = self.renderer.had_output();
        self.renderer.checkpoint(self.term);
        if had_output {
            self.term.newline();
        }

        let summary = args_summary(call);
        self.turn.tools.print_transient(
            self.term,
            &format!("\x1b[93m⚙ {}\x1b[0m \x1b[2m{summary}\x1b[0m", call.name),
        );
        if let Some(diff) = edit_diff_preview(call) {
            self.turn.tools.print_sticky(self.term, &diff);
        }

        let danger = danger_reason(call);
        if let Some(reason) = danger {
            self.turn.tools.print_transient(
                self.term,
                &format!("\x1b[91m⚠ destructive command: {reason}\x1b[0m"),
            );
        }
        if danger.is_none() && self.approvals.is_auto(&call.name) {
            return Decision::Allow;
        }
        prompt_user(self.term, call, self.approvals)
    }

    async fn on_tool_result(&mut self, call: &ToolCallRecord, output: &ToolOutput, is_error: bool) {
        let mark = if is_error { "\x1b[91m✗\x1b[0m" } else { "\x1b[92m✓\x1b[0m" };
        let preview: String = output.content.chars().take(60).collect();
        self.turn.tools.print_transient(
            self.term,
            &format!("{mark} {} \x1b[2m{preview}\x1b[0m", call.name),
        );
    }

    async fn on_tool_warning(&mut self, message: &str, _call: Option<&ToolCallRecord>) {
        self.turn
            .tools
            .print_transient(self.term, &format!("\x1b[93m! {message}\x1b[0m"));
    }
}
