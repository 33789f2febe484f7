// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Slash-command surface of the REPL.

use pilot_core::Conversation;

use crate::controller::Controller;
use crate::sysprompt::{apply_update, PromptStore, PromptUpdate};

pub enum CommandOutcome {
    Continue,
    Quit,
}

const HELP: &str = "\
/help                      show this help\n\
/clear                     start a fresh conversation\n\
/model [name]              show or set the model\n\
/models                    list models reported by the endpoint\n\
/tools                     list available tools\n\
/tokens                    token counters\n\
/cost                      cost summary\n\
/save <name>               save the conversation\n\
/load <name>               load a saved conversation\n\
/list                      list saved conversations\n\
/conversation              dump the current message log\n\
/prompt [list|set|clear|show]     manage the active user prompt\n\
/sysprompt [list|set|clear|show]  manage the custom system prompt\n\
/quit                      exit\n";

pub async fn handle_command(ctrl: &mut Controller, line: &str) -> CommandOutcome {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or("");
    let arg1 = parts.next().map(str::to_string);
    let arg2 = parts.next().map(str::to_string);

    match command {
        "/help" => ctrl.print_info(HELP),
        "/quit" | "/exit" => return CommandOutcome::Quit,
        "/clear" => {
            ctrl.conversation = Conversation::new(None, ctrl.config.model.context_window)
                .with_redaction(
                    ctrl.config.agent.redact_tool_bytes,
                    ctrl.config.agent.redact_keep_turns,
                );
            ctrl.last_response_id = None;
            ctrl.print_info("conversation cleared");
        }
        "/model" => match arg1 {
            Some(name) => {
                ctrl.model = name;
                ctrl.print_info(&format!("model set to {}", ctrl.model));
            }
            None => ctrl.print_info(&format!("model: {}", ctrl.model)),
        },
        "/models" => match ctrl.client.list_models().await {
            Ok(models) if models.is_empty() => ctrl.print_info("(endpoint reported no models)"),
            Ok(models) => ctrl.print_info(&models.join("\n")),
            Err(e) => ctrl.print_error(&e.to_string()),
        },
        "/tools" => {
            let mut out = String::new();
            for name in ctrl.registry.names() {
                let first_line = ctrl
                    .registry
                    .get(&name)
                    .map(|t| t.description().lines().next().unwrap_or("").to_string())
                    .unwrap_or_default();
                out.push_str(&format!("{name:<12} {first_line}\n"));
            }
            ctrl.print_info(&out);
        }
        "/tokens" => {
            let c = *ctrl.conversation.cost();
            ctrl.print_info(&format!(
                "input {} | output {} | cached {} | last ctx {} ({:.1}%) | peak {} ({:.1}%)",
                c.input_tokens,
                c.output_tokens,
                c.cached_tokens,
                c.last_ctx_tokens,
                c.last_ctx_pct,
                c.peak_ctx_tokens,
                c.peak_ctx_pct,
            ));
        }
        "/cost" => {
            let c = *ctrl.conversation.cost();
            ctrl.print_info(&format!(
                "requests {} | total ${:.4}",
                c.requests, c.total_cost
            ));
        }
        "/save" => match arg1 {
            Some(name) => match ctrl.conversation.save(&name) {
                Ok(path) => ctrl.print_info(&format!("saved to {}", path.display())),
                Err(e) => ctrl.print_error(&e.to_string()),
            },
            None => ctrl.print_error("usage: /save <name>"),
        },
        "/load" => match arg1 {
            Some(name) => match Conversation::load(&name) {
                Ok(conversation) => {
                    ctrl.conversation = conversation.with_redaction(
                        ctrl.config.agent.redact_tool_bytes,
                        ctrl.config.agent.redact_keep_turns,
                    );
                    // A restored log has no live server-side context.
                    ctrl.last_response_id = None;
                    ctrl.print_info(&format!("loaded {name}"));
                }
                Err(e) => ctrl.print_error(&e.to_string()),
            },
            None => ctrl.print_error("usage: /load <name>"),
        },
        "/list" => {
            let names = Conversation::list_saved();
            if names.is_empty() {
                ctrl.print_info("(no saved conversations)");
            } else {
                ctrl.print_info(&names.join("\n"));
            }
        }
        "/conversation" => {
            let mut out = String::new();
            for message in ctrl.conversation.raw_messages() {
                let (role, body) = match message {
                    pilot_model::Message::System { .. } => ("system", "(system prompt)".to_string()),
                    pilot_model::Message::User { content } => ("user", content.clone()),
                    pilot_model::Message::Assistant { content, tool_calls, .. } => {
                        if tool_calls.is_empty() {
                            ("assistant", content.clone())
                        } else {
                            let names: Vec<&str> =
                                tool_calls.iter().map(|c| c.name.as_str()).collect();
                            ("assistant", format!("{content} [calls: {}]", names.join(", ")))
                        }
                    }
                    pilot_model::Message::Tool { tool_call_id, content } => {
                        let preview: String = content.chars().take(80).collect();
                        ("tool", format!("({tool_call_id}) {preview}"))
                    }
                };
                let first: String = body.lines().next().unwrap_or("").chars().take(100).collect();
                out.push_str(&format!("{role:>9}: {first}\n"));
            }
            ctrl.print_info(&out);
        }
        "/prompt" => prompt_command(ctrl, PromptStore::user_prompts(), arg1, arg2, false),
        "/sysprompt" => prompt_command(ctrl, PromptStore::system_prompts(), arg1, arg2, true),
        other => ctrl.print_error(&format!("unknown command {other}; /help lists commands")),
    }
    CommandOutcome::Continue
}

/// Shared handler for `/prompt` and `/sysprompt`.
fn prompt_command(
    ctrl: &mut Controller,
    store: PromptStore,
    sub: Option<String>,
    name: Option<String>,
    system: bool,
) {
    let update = match sub.as_deref() {
        None | Some("show") => {
            let active = if system { ctrl.custom_system_prompt.clone() } else { ctrl.user_prompt.clone() };
            match active {
                Some(text) => ctrl.print_info(&text),
                None => ctrl.print_info("(not set)"),
            }
            return;
        }
        Some("list") => {
            let names = store.list();
            if names.is_empty() {
                ctrl.print_info("(empty)");
            } else {
                ctrl.print_info(&names.join("\n"));
            }
            return;
        }
        Some("set") => match name {
            Some(name) => match store.read(&name) {
                Ok(content) => PromptUpdate::Set(content),
                Err(e) => {
                    ctrl.print_error(&format!("cannot read {name}: {e}"));
                    return;
                }
            },
            None => {
                ctrl.print_error("usage: set <name>");
                return;
            }
        },
        Some("clear") => PromptUpdate::Clear,
        Some(other) => {
            ctrl.print_error(&format!("unknown subcommand {other}"));
            return;
        }
    };
    let slot = if system { &mut ctrl.custom_system_prompt } else { &mut ctrl.user_prompt };
    apply_update(slot, update);
    ctrl.print_info("updated");
}
