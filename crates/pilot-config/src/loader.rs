// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Root of pilot's persisted state: `~/.config/pilot`.
///
/// `HOME` is honoured explicitly so the whole state tree can be redirected
/// in tests and sandboxes without faking the platform config dir.
pub fn config_home() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config/pilot");
    }
    dirs::home_dir()
        .map(|h| h.join(".config/pilot"))
        .unwrap_or_else(|| PathBuf::from(".config/pilot"))
}

/// Ordered list of config file locations searched from lowest to highest
/// priority.  Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    paths.push(config_home().join("config.yaml"));
    paths.push(config_home().join("config.yml"));
    // Workspace-local overrides
    paths.push(PathBuf::from(".pilot.yaml"));
    paths.push(PathBuf::from(".pilot.yml"));
    paths
}

/// Load configuration by merging all discovered YAML files, then apply
/// environment overrides.  The `extra` argument may provide an explicit
/// path (e.g. a `--config` CLI flag); a missing explicit path is an error,
/// missing search-path files are not.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty())
    {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Environment variables take precedence over every config file layer.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(url) = std::env::var("LLM_API_URL") {
        if !url.is_empty() {
            config.model.api_url = Some(url);
        }
    }
    if let Ok(key) = std::env::var("LLM_API_KEY") {
        if !key.is_empty() {
            config.model.api_key = Some(key);
        }
    }
    if let Ok(timeout) = std::env::var("LLM_API_TIMEOUT") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.model.timeout_secs = Some(secs);
        }
    }
    if let Ok(token) = std::env::var("LINKUP_API_TOKEN") {
        if !token.is_empty() {
            config.tools.linkup_api_token = Some(token);
        }
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
