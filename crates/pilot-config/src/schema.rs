// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be on unless explicitly disabled
/// need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name forwarded to the endpoint
    pub name: String,
    /// API base URL ending before `/chat/completions`.
    /// Overridden by the LLM_API_URL environment variable.
    pub api_url: Option<String>,
    /// Explicit API key; prefer LLM_API_KEY in the environment so secrets
    /// never land in config files
    pub api_key: Option<String>,
    /// Unary request timeout in seconds (streaming requests have no overall
    /// timeout).  Overridden by LLM_API_TIMEOUT.
    pub timeout_secs: Option<u64>,
    /// Context window in tokens.  0 means "unknown" — context percentage
    /// displays show 0 until the server reports usage.
    #[serde(default)]
    pub context_window: u32,
    /// Price per input token in dollars (cost display shows 0 when unset)
    pub prompt_price: Option<f64>,
    /// Price per output token in dollars
    pub completion_price: Option<f64>,

    // ── Sampling ─────────────────────────────────────────────────────────────
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub min_p: Option<f32>,
    pub max_new_tokens: Option<u32>,

    /// Use the alternate "responses" endpoint instead of chat completions.
    #[serde(default)]
    pub responses_endpoint: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            api_url: None,
            api_key: None,
            timeout_secs: None,
            context_window: 0,
            prompt_price: None,
            completion_price: None,
            temperature: Some(0.2),
            top_p: None,
            top_k: None,
            min_p: None,
            max_new_tokens: None,
            responses_endpoint: false,
        }
    }
}

fn default_max_steps() -> u32 {
    24
}
fn default_trim_threshold_pct() -> f64 {
    90.0
}
fn default_fail_threshold_pct() -> f64 {
    95.0
}
fn default_max_trims_per_turn() -> usize {
    3
}
fn default_redact_tool_bytes() -> usize {
    4096
}
fn default_redact_keep_turns() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of assistant↔tool rounds per user turn
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Context percentage at which the controller trims oldest turns
    #[serde(default = "default_trim_threshold_pct")]
    pub trim_threshold_pct: f64,
    /// Context percentage at which a send with no trimmable history fails
    #[serde(default = "default_fail_threshold_pct")]
    pub fail_threshold_pct: f64,
    /// Upper bound on turns removed by one trimming pass
    #[serde(default = "default_max_trims_per_turn")]
    pub max_trims_per_turn: usize,
    /// Tool results larger than this many bytes are elided from the API view
    /// once they fall behind the recent-turn window.  0 disables redaction.
    #[serde(default = "default_redact_tool_bytes")]
    pub redact_tool_bytes: usize,
    /// Number of most-recent turns whose tool results are never redacted
    #[serde(default = "default_redact_keep_turns")]
    pub redact_keep_turns: usize,
    /// System prompt template override; None uses the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            trim_threshold_pct: default_trim_threshold_pct(),
            fail_threshold_pct: default_fail_threshold_pct(),
            max_trims_per_turn: default_max_trims_per_turn(),
            redact_tool_bytes: default_redact_tool_bytes(),
            redact_keep_turns: default_redact_keep_turns(),
            system_prompt: None,
        }
    }
}

fn default_shell_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tool names that run without an approval prompt.  The shell pre-check
    /// still elevates destructive commands to a mandatory prompt.
    #[serde(default)]
    pub auto_approve: Vec<String>,
    /// Shell command timeout in seconds
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Linkup web-search API token; LINKUP_API_TOKEN takes precedence
    #[serde(default)]
    pub linkup_api_token: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve: vec!["read".into(), "web_search".into(), "fetch".into()],
            shell_timeout_secs: default_shell_timeout(),
            linkup_api_token: None,
        }
    }
}

fn default_indent_step() -> usize {
    2
}
fn default_bullet() -> String {
    "•".into()
}
fn default_checkbox_unchecked() -> String {
    "☐".into()
}
fn default_checkbox_checked() -> String {
    "☑".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Render width in columns; 0 means "query the terminal".
    #[serde(default)]
    pub width: u16,
    /// Indent step per nested list level
    #[serde(default = "default_indent_step")]
    pub indent_step: usize,
    /// Unordered list marker glyph
    #[serde(default = "default_bullet")]
    pub bullet: String,
    /// Task-list glyphs
    #[serde(default = "default_checkbox_unchecked")]
    pub checkbox_unchecked: String,
    #[serde(default = "default_checkbox_checked")]
    pub checkbox_checked: String,
    /// Emit OSC 66 text-sizing sequences for headings.  Requires a terminal
    /// with Kitty text-sizing support; plain styling is used otherwise.
    #[serde(default)]
    pub text_sizing: bool,
    /// Use plain-ASCII border characters instead of Unicode box drawing
    #[serde(default)]
    pub ascii: bool,
    /// Label fenced divs with their class name on the border
    #[serde(default = "default_true")]
    pub label_divs: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 0,
            indent_step: default_indent_step(),
            bullet: default_bullet(),
            checkbox_unchecked: default_checkbox_unchecked(),
            checkbox_checked: default_checkbox_checked(),
            text_sizing: false,
            ascii: false,
            label_divs: true,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_agent_limits() {
        let c = Config::default();
        assert_eq!(c.agent.max_steps, 24);
        assert_eq!(c.agent.max_trims_per_turn, 3);
        assert!(c.agent.fail_threshold_pct > c.agent.trim_threshold_pct);
    }

    #[test]
    fn default_tools_auto_approve_read_only_tools() {
        let c = ToolsConfig::default();
        assert!(c.auto_approve.contains(&"read".to_string()));
        assert!(!c.auto_approve.contains(&"shell".to_string()));
        assert!(!c.auto_approve.contains(&"edit".to_string()));
    }

    #[test]
    fn config_deserializes_from_partial_yaml() {
        let c: Config = serde_yaml::from_str("model:\n  name: qwen3\n").unwrap();
        assert_eq!(c.model.name, "qwen3");
        assert_eq!(c.agent.max_steps, 24, "missing sections use defaults");
    }

    #[test]
    fn render_defaults_use_unicode_glyphs() {
        let r = RenderConfig::default();
        assert_eq!(r.bullet, "•");
        assert!(!r.ascii);
        assert!(r.label_divs);
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let c = Config::default();
        let text = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.model.name, c.model.name);
        assert_eq!(back.agent.redact_tool_bytes, c.agent.redact_tool_bytes);
    }
}
