// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt assembly and the prompt/system-prompt stores.
//!
//! The system prompt is rebuilt every turn: it embeds dynamic context (the
//! working directory, the project index, the tool manifest) that changes as
//! the session runs.

use std::path::{Path, PathBuf};

/// Explicit prompt-state update; `Clear` removes the active value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptUpdate {
    Set(String),
    Clear,
}

/// Name of the project index file read from the working directory and the
/// git repository root.
const PROJECT_INDEX_FILE: &str = "AGENTS.md";

const BASE_PROMPT: &str = "\
You are pilot, an AI coding assistant running inside the user's terminal.\n\
You can inspect and modify the project with the tools listed below.\n\
Rules:\n\
- Prefer the read/edit/write tools over shell for file operations.\n\
- Keep answers short; the user is in a terminal.\n\
- Never invent file contents; read before you edit.\n";

/// Build the full system prompt for this turn.
pub fn build(
    custom_system_prompt: Option<&str>,
    user_prompt: Option<&str>,
    tool_names: &[String],
) -> String {
    let mut out = String::new();
    match custom_system_prompt {
        Some(custom) => out.push_str(custom),
        None => out.push_str(BASE_PROMPT),
    }
    out.push('\n');

    if let Ok(cwd) = std::env::current_dir() {
        out.push_str(&format!("Working directory: {}\n", cwd.display()));
    }
    if !tool_names.is_empty() {
        out.push_str(&format!("Available tools: {}\n", tool_names.join(", ")));
    }
    if let Some(index) = project_index() {
        out.push_str("\nProject index:\n");
        out.push_str(&index);
        out.push('\n');
    }
    if let Some(prompt) = user_prompt {
        out.push('\n');
        out.push_str(prompt);
        out.push('\n');
    }
    out
}

/// Read the project index from the working directory and, when different,
/// from the discovered git repository root.  Missing files are not an error.
fn project_index() -> Option<String> {
    let cwd = std::env::current_dir().ok()?;
    let mut sections = Vec::new();
    let local = cwd.join(PROJECT_INDEX_FILE);
    if let Ok(content) = std::fs::read_to_string(&local) {
        sections.push(content);
    }
    if let Some(root) = git_root(&cwd) {
        if root != cwd {
            if let Ok(content) = std::fs::read_to_string(root.join(PROJECT_INDEX_FILE)) {
                sections.push(content);
            }
        }
    }
    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n"))
    }
}

/// Walk up from `start` to the directory containing `.git`.
fn git_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

// ─── Prompt stores ────────────────────────────────────────────────────────────

/// A named-file store under the agent state directory; used for both user
/// prompts and custom system prompts.
pub struct PromptStore {
    dir: PathBuf,
}

impl PromptStore {
    pub fn user_prompts() -> Self {
        Self { dir: pilot_config::config_home().join("agent/prompts") }
    }

    pub fn system_prompts() -> Self {
        Self { dir: pilot_config::config_home().join("agent/system_prompts") }
    }

    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn read(&self, name: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.dir.join(name))
    }

    pub fn write(&self, name: &str, content: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(name), content)
    }
}

/// Apply an update message to an optional prompt slot.
pub fn apply_update(slot: &mut Option<String>, update: PromptUpdate) {
    match update {
        PromptUpdate::Set(value) => *slot = Some(value),
        PromptUpdate::Clear => *slot = None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
