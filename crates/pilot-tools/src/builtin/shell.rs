// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{ApprovalPolicy, Tool, ToolCall, ToolOutput};

/// Built-in tool that runs a shell command.
pub struct ShellTool {
    pub timeout_secs: u64,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout, stderr and the exit code.\n\
         'command' is required and can be any sh one-liner.\n\
         Prefer non-interactive commands; avoid anything that needs a TTY.\n\
         For file operations use the dedicated tools instead:\n\
         - Read files  -> read  (not cat / head / tail)\n\
         - Write files -> write (not tee / redirection)\n\
         - Edit files  -> edit  (not sed / awk / patch)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The complete sh one-liner to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "shell", "missing required parameter 'command'"),
        };
        let timeout = call
            .args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "shell tool");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        // The subprocess must not touch the controlling terminal: with stdin
        // on /dev/null, isatty(0) is false and terminal-manipulation paths in
        // child programs are skipped.  kill_on_drop sends SIGKILL when the
        // timeout future drops the handle.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(timeout), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let ok = exit_code == 0;
                let mut result = json!({
                    "name": "shell",
                    "ok": ok,
                    "exit_code": exit_code,
                    "stdout": stdout,
                    "stderr": stderr,
                });
                if !ok {
                    result["error"] = json!(format!("command exited with status {exit_code}"));
                }
                ToolOutput::from_result(&call.id, result)
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, "shell", format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, "shell", format!("timeout after {timeout}s")),
        }
    }
}

// ─── Destructive-command pre-check ────────────────────────────────────────────

struct DangerPattern {
    regex: Regex,
    reason: &'static str,
}

fn danger_patterns() -> &'static [DangerPattern] {
    static PATTERNS: OnceLock<Vec<DangerPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let compile = |re: &str, reason: &'static str| DangerPattern {
            regex: Regex::new(re).expect("static pattern"),
            reason,
        };
        vec![
            compile(
                r"\brm\s+(-[a-z]*r[a-z]*f[a-z]*|-[a-z]*f[a-z]*r[a-z]*)\b|\brm\s+-r\b.*\s-f\b|\brm\s+-f\b.*\s-r\b|\brm\s+--recursive\b.*--force\b|\brm\s+--force\b.*--recursive\b",
                "recursive delete",
            ),
            compile(r"\bmkfs(\.[a-z0-9]+)?\b|\bmkswap\b", "filesystem format"),
            compile(r"\bdd\b[^;|&]*\bof=/dev/", "raw disk write"),
            compile(r">+\s*/dev/(sd|hd|nvme|mmcblk|vd|xvd)", "device write"),
            compile(r"\bgit\s+push\b[^;|&]*(\s--force(-with-lease)?\b|\s-f\b)", "git force push"),
            compile(r"\bgit\s+reset\s+--hard\b", "git hard reset"),
            compile(r"\bgit\s+clean\b[^;|&]*\s-[a-z]*f", "git force clean"),
            compile(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:", "fork bomb"),
            compile(
                r"(^|\s)(sudo\s+)?(shutdown|reboot|poweroff|halt)(\s|$)|\bsystemctl\s+(poweroff|reboot|halt)(\s|$)",
                "system shutdown/reboot",
            ),
        ]
    })
}

/// Pattern-based pre-check for destructive commands.
///
/// The command is whitespace-normalized and lowercased before matching.
/// Returns the first matching reason from the fixed set; the controller uses
/// this to force an approval prompt even for auto-approved tools.
pub fn check_command(cmd: &str) -> Option<&'static str> {
    let normalized = cmd
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    danger_patterns()
        .iter()
        .find(|p| p.regex.is_match(&normalized))
        .map(|p| p.reason)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
