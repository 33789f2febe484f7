// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-turn display state.
//!
//! Everything the turn's callbacks mutate lives here as owned fields (no
//! captured closure state): the tool-line bookkeeping, the thinking
//! indicator, and the flags that decide when lines get cleared.

use std::io::Write;

use pilot_render::Term;

/// Frames for the thinking indicator.
const SPINNER: [char; 4] = ['⠋', '⠙', '⠸', '⠴'];

/// Tracks the tool lines currently painted below the streamed text.
///
/// Transient lines are cleared when a new tool call supersedes them or when
/// the assistant resumes text output while sticky lines exist.  Sticky lines
/// (edit-diff previews) stay visible until new text output displaces them.
#[derive(Debug, Default)]
pub struct ToolRenderState {
    transient: usize,
    sticky: usize,
    /// A tool chain has painted something this turn.
    pub active: bool,
}

impl ToolRenderState {
    /// Print a transient tool line, clearing the previous non-sticky display.
    pub fn print_transient<W: Write>(&mut self, term: &mut Term<W>, line: &str) {
        if self.transient > 0 && self.sticky == 0 {
            term.clear_lines_up(self.transient as u16);
            self.transient = 0;
        }
        term.write_str(line);
        term.newline();
        term.flush();
        self.transient += 1;
        self.active = true;
    }

    /// Print sticky lines (diff previews); they survive nested tool calls.
    pub fn print_sticky<W: Write>(&mut self, term: &mut Term<W>, lines: &[String]) {
        for line in lines {
            term.write_str(line);
            term.newline();
        }
        term.flush();
        self.sticky += lines.len();
        self.active = true;
    }

    /// The assistant resumed text output.  With sticky lines on screen the
    /// whole tool display is stale and gets cleared; plain transients stay.
    pub fn on_text_output<W: Write>(&mut self, term: &mut Term<W>) {
        if self.sticky > 0 {
            let total = (self.sticky + self.transient) as u16;
            term.clear_lines_up(total);
            self.sticky = 0;
            self.transient = 0;
        }
        self.active = false;
    }

    /// Forget painted lines without clearing them (end of turn).
    pub fn reset(&mut self) {
        self.transient = 0;
        self.sticky = 0;
        self.active = false;
    }

    pub fn has_sticky(&self) -> bool {
        self.sticky > 0
    }
}

/// Animated "thinking" line shown while reasoning tokens arrive before any
/// output text.
#[derive(Debug, Default)]
pub struct ThinkingIndicator {
    shown: bool,
    frame: usize,
}

impl ThinkingIndicator {
    /// Advance the animation; draws in place on the current line.
    pub fn tick<W: Write>(&mut self, term: &mut Term<W>) {
        let glyph = SPINNER[self.frame % SPINNER.len()];
        self.frame += 1;
        if self.shown {
            term.clear_line();
        }
        term.write_str(&format!("\x1b[2m{glyph} thinking …\x1b[0m"));
        term.flush();
        self.shown = true;
    }

    /// Remove the indicator line before the first output chunk.
    pub fn clear<W: Write>(&mut self, term: &mut Term<W>) {
        if self.shown {
            term.clear_line();
            term.flush();
            self.shown = false;
        }
    }

    pub fn is_shown(&self) -> bool {
        self.shown
    }
}

/// All mutable display state for one turn of the controller.
#[derive(Debug, Default)]
pub struct TurnState {
    pub tools: ToolRenderState,
    pub thinking: ThinkingIndicator,
    /// The assistant has produced output text this turn.
    pub saw_output: bool,
}

impl TurnState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
