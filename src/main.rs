// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod approval;
mod commands;
mod controller;
mod sysprompt;
mod turnstate;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use controller::Controller;

#[derive(Parser)]
#[command(name = "pilot", about = "An interactive terminal AI coding agent", version)]
struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model name override
    #[arg(long, short)]
    model: Option<String>,

    /// One-shot prompt; the interactive REPL starts when omitted
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let config = pilot_config::load(cli.config.as_deref())?;
    let mut controller = Controller::new(config, cli.model);

    if cli.prompt.is_empty() {
        controller.run().await
    } else {
        controller.run_once(cli.prompt.join(" ")).await
    }
}

/// Wire up tracing.
///
/// Interactive output owns the terminal, so log lines must never hit stdout:
/// `LLM_DEBUG_MODE=1` raises the filter to debug and `LLM_DEBUG_FILE`
/// redirects everything to a file; without a file, logs go to stderr.
fn init_logging() -> anyhow::Result<()> {
    let debug_mode = std::env::var("LLM_DEBUG_MODE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let filter = if debug_mode {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    match std::env::var("LLM_DEBUG_FILE") {
        Ok(path) if !path.is_empty() => {
            let expanded = shellexpand::tilde(&path).into_owned();
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&expanded)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
