// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! In-band tool approval.
//!
//! The prompt runs between tool calls, never during streamed text, so the
//! terminal is in sane line-buffered mode and a whole line is read per
//! answer.  `p` previews the call (diff for edits) in a pager, `e` round-trips
//! the arguments through `$EDITOR`, `m` aborts with a follow-up message, `a`
//! auto-approves the tool for the rest of the session.

use std::collections::HashSet;
use std::io::Write as _;

use similar::{ChangeTag, TextDiff};

use pilot_core::Decision;
use pilot_model::ToolCallRecord;
use pilot_render::Term;
use pilot_tools::check_command;

/// Session-scoped approval bookkeeping.
pub struct ApprovalState {
    /// Tools auto-approved in the config
    configured_auto: HashSet<String>,
    /// Tools promoted by the `a` answer; valid for this session only
    session_auto: HashSet<String>,
}

impl ApprovalState {
    pub fn new(configured: &[String]) -> Self {
        Self {
            configured_auto: configured.iter().cloned().collect(),
            session_auto: HashSet::new(),
        }
    }

    pub fn is_auto(&self, tool: &str) -> bool {
        self.configured_auto.contains(tool) || self.session_auto.contains(tool)
    }

    pub fn approve_for_session(&mut self, tool: &str) {
        self.session_auto.insert(tool.to_string());
    }
}

/// Destructive-command elevation: a flagged shell command forces the prompt
/// even when the tool is auto-approved.
pub fn danger_reason(call: &ToolCallRecord) -> Option<&'static str> {
    if call.name != "shell" {
        return None;
    }
    let args: serde_json::Value = serde_json::from_str(&call.arguments).ok()?;
    let command = args.get("command")?.as_str()?;
    check_command(command)
}

/// Short single-line argument summary for the tool display line.
pub fn args_summary(call: &ToolCallRecord) -> String {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str(&call.arguments);
    let Ok(serde_json::Value::Object(map)) = parsed else {
        return truncate_chars(&call.arguments, 60);
    };
    let parts: Vec<String> = map
        .iter()
        .take(2)
        .map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => truncate_chars(s, 40),
                other => truncate_chars(&other.to_string(), 40),
            };
            format!("{k}={value}")
        })
        .collect();
    parts.join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push('…');
    }
    // Newlines would break the single-line display.
    out.replace('\n', "␤")
}

/// Styled diff preview for an edit call; `None` for other tools.
pub fn edit_diff_preview(call: &ToolCallRecord) -> Option<Vec<String>> {
    if call.name != "edit" {
        return None;
    }
    let args: serde_json::Value = serde_json::from_str(&call.arguments).ok()?;
    let old = args.get("old_text")?.as_str()?;
    let new = args.get("new_text")?.as_str()?;
    let diff = TextDiff::from_lines(old, new);
    let mut lines = Vec::new();
    for change in diff.iter_all_changes() {
        let body = change.value().trim_end_matches('\n');
        let line = match change.tag() {
            ChangeTag::Delete => format!("\x1b[91m- {body}\x1b[0m"),
            ChangeTag::Insert => format!("\x1b[92m+ {body}\x1b[0m"),
            ChangeTag::Equal => format!("\x1b[2m  {body}\x1b[0m"),
        };
        lines.push(line);
    }
    Some(lines)
}

/// Plain-text preview used by the `p` answer.
fn preview_text(call: &ToolCallRecord) -> String {
    let pretty = serde_json::from_str::<serde_json::Value>(&call.arguments)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| call.arguments.clone());
    match edit_diff_preview(call) {
        Some(diff) => {
            let stripped: Vec<String> = diff
                .iter()
                .map(|l| strip_sgr(l))
                .collect();
            format!("[{}]\n\n{}\n\nDiff:\n{}", call.name, pretty, stripped.join("\n"))
        }
        None => format!("[{}]\n\n{}", call.name, pretty),
    }
}

fn strip_sgr(s: &str) -> String {
    let mut out = String::new();
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for f in chars.by_ref() {
                if ('\u{40}'..='\u{7e}').contains(&f) && f != '[' {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Read one line from stdin without starving the async runtime.
pub(crate) fn read_line() -> std::io::Result<String> {
    tokio::task::block_in_place(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
}

/// Show `content` in the user's pager; failures are non-fatal.
fn open_pager(content: &str) -> std::io::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    tokio::task::block_in_place(|| {
        std::process::Command::new(&pager)
            .arg(file.path())
            .status()
            .map(|_| ())
    })
}

/// Round-trip the call arguments through `$EDITOR`; returns the edited call
/// when the result parses as a JSON object.
fn edit_arguments(call: &ToolCallRecord) -> Result<ToolCallRecord, String> {
    let editor = std::env::var("EDITOR").map_err(|_| "EDITOR is not set".to_string())?;
    let pretty = serde_json::from_str::<serde_json::Value>(&call.arguments)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| call.arguments.clone());

    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .map_err(|e| e.to_string())?;
    file.write_all(pretty.as_bytes()).map_err(|e| e.to_string())?;
    file.flush().map_err(|e| e.to_string())?;

    let status = tokio::task::block_in_place(|| {
        std::process::Command::new(&editor).arg(file.path()).status()
    })
    .map_err(|e| format!("failed to launch {editor}: {e}"))?;
    if !status.success() {
        return Err(format!("{editor} exited with {status}"));
    }

    let edited = std::fs::read_to_string(file.path()).map_err(|e| e.to_string())?;
    let value: serde_json::Value =
        serde_json::from_str(&edited).map_err(|e| format!("edited arguments are not valid JSON: {e}"))?;
    if !value.is_object() {
        return Err("edited arguments must be a JSON object".to_string());
    }
    Ok(ToolCallRecord {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: serde_json::to_string(&value).unwrap_or(edited),
    })
}

/// Run the interactive approval prompt for one call.
pub fn prompt_user<W: std::io::Write>(
    term: &mut Term<W>,
    call: &ToolCallRecord,
    state: &mut ApprovalState,
) -> Decision {
    loop {
        term.write_str(&format!("[{}] Execute? [Y/n/p/e/m/a] ", call.name));
        term.flush();
        let answer = match read_line() {
            Ok(line) => line.trim().to_lowercase(),
            Err(_) => return Decision::Abort,
        };
        match answer.as_str() {
            "" | "y" => return Decision::Allow,
            "n" => return Decision::Abort,
            "p" => {
                if open_pager(&preview_text(call)).is_err() {
                    term.write_str("pager unavailable\n");
                }
                // fall through and ask again
            }
            "e" => match edit_arguments(call) {
                Ok(edited) => return Decision::Modify(edited),
                Err(e) => {
                    term.write_str(&format!("edit failed: {e}\n"));
                }
            },
            "m" => {
                term.write_str("message: ");
                term.flush();
                match read_line() {
                    Ok(message) if !message.trim().is_empty() => {
                        return Decision::AbortWithMessage(message.trim().to_string());
                    }
                    _ => return Decision::Abort,
                }
            }
            "a" => {
                state.approve_for_session(&call.name);
                return Decision::Allow;
            }
            _ => {
                term.write_str("answer y, n, p, e, m, or a\n");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: serde_json::Value) -> ToolCallRecord {
        ToolCallRecord {
            id: "c1".into(),
            name: name.into(),
            arguments: args.to_string(),
        }
    }

    // ── Session auto-approval ─────────────────────────────────────────────────

    #[test]
    fn configured_tools_are_auto() {
        let state = ApprovalState::new(&["read".into()]);
        assert!(state.is_auto("read"));
        assert!(!state.is_auto("shell"));
    }

    #[test]
    fn session_approval_is_additive_and_scoped() {
        let mut state = ApprovalState::new(&[]);
        assert!(!state.is_auto("shell"));
        state.approve_for_session("shell");
        assert!(state.is_auto("shell"));
        // A fresh session starts clean.
        let fresh = ApprovalState::new(&[]);
        assert!(!fresh.is_auto("shell"));
    }

    // ── Destructive elevation ─────────────────────────────────────────────────

    #[test]
    fn danger_reason_flags_destructive_shell() {
        let c = call("shell", serde_json::json!({"command": "rm -rf /"}));
        assert_eq!(danger_reason(&c), Some("recursive delete"));
    }

    #[test]
    fn danger_reason_ignores_other_tools() {
        let c = call("read", serde_json::json!({"filepath": "rm -rf /"}));
        assert_eq!(danger_reason(&c), None);
    }

    #[test]
    fn danger_reason_ignores_safe_commands() {
        let c = call("shell", serde_json::json!({"command": "ls -la"}));
        assert_eq!(danger_reason(&c), None);
    }

    // ── Summaries and previews ────────────────────────────────────────────────

    #[test]
    fn args_summary_shows_first_keys() {
        let c = call("read", serde_json::json!({"filepath": "src/main.rs", "limit": 100}));
        let s = args_summary(&c);
        assert!(s.contains("filepath=src/main.rs"), "{s}");
    }

    #[test]
    fn args_summary_flattens_newlines() {
        let c = call("write", serde_json::json!({"content": "a\nb"}));
        assert!(!args_summary(&c).contains('\n'));
    }

    #[test]
    fn edit_diff_preview_marks_changes() {
        let c = call(
            "edit",
            serde_json::json!({
                "filepath": "x.rs",
                "old_text": "keep\nremove me\n",
                "new_text": "keep\nadd me\n"
            }),
        );
        let lines = edit_diff_preview(&c).unwrap();
        let joined = lines.join("\n");
        assert!(joined.contains("- remove me"), "{joined}");
        assert!(joined.contains("+ add me"), "{joined}");
        assert!(joined.contains("  keep"), "{joined}");
    }

    #[test]
    fn no_diff_preview_for_non_edit_tools() {
        let c = call("shell", serde_json::json!({"command": "ls"}));
        assert!(edit_diff_preview(&c).is_none());
    }

    #[test]
    fn preview_text_contains_tool_name_and_args() {
        let c = call("shell", serde_json::json!({"command": "make test"}));
        let text = preview_text(&c);
        assert!(text.contains("[shell]"));
        assert!(text.contains("make test"));
    }
}
