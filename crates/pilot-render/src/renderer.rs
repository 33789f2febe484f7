// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming markdown renderer.
//!
//! Consumes [`MdEvent`]s and paints styled text immediately.  Constructs that
//! need a final shape — code blocks, fenced divs, blockquotes, tables,
//! headings — are echoed for feedback while a capture tracks exactly how many
//! screen rows were written; at block end the renderer enters a synchronized
//! window, moves up over the echo, clears it, and repaints the finished form.
//! The row count is tracked, never measured from the terminal.

use std::io::Write;

use crossterm::style::Color;

use pilot_config::RenderConfig;

use crate::event::{Align, Block, Inline, MdEvent};
use crate::style::{emit_sized, visible_width, Style, TextSize};
use crate::term::Term;

// ─── Capture regions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum RegionKind {
    Code { lang: String },
    Div { class: String },
    Quote,
}

/// One capture region: output is mirrored here while still being echoed so
/// the repaint can reproduce (or replace) what is on screen.
struct Region {
    kind: RegionKind,
    /// Completed rendered lines (ANSI included for div/quote, raw for code)
    lines: Vec<String>,
    /// Current incomplete line
    partial: String,
    /// Screen rows currently occupied by this region's echo
    echo_rows: usize,
    /// Render width in effect before this region narrowed it
    width_before: usize,
}

// ─── Table buffering ──────────────────────────────────────────────────────────

type CellSpans = Vec<(String, Style)>;

#[derive(Default)]
struct TableBuf {
    header: Vec<CellSpans>,
    rows: Vec<Vec<CellSpans>>,
    in_head: bool,
    current_row: Vec<CellSpans>,
    in_cell: bool,
}

struct ListState {
    next: Option<u64>,
}

// ─── Renderer ─────────────────────────────────────────────────────────────────

pub struct Renderer {
    cfg: RenderConfig,
    base_width: usize,
    width: usize,
    style_stack: Vec<Style>,
    col: usize,
    word: String,
    had_output: bool,
    /// Heading text is withheld until block end so sizing can span the line.
    heading: Option<(u8, Vec<(String, Style)>)>,
    regions: Vec<Region>,
    table: Option<TableBuf>,
    lists: Vec<ListState>,
}

impl Renderer {
    pub fn new(cfg: RenderConfig, term_width: u16) -> Self {
        let width = if cfg.width > 0 { cfg.width } else { term_width } as usize;
        let width = width.max(20);
        Self {
            cfg,
            base_width: width,
            width,
            style_stack: vec![Style::default()],
            col: 0,
            word: String::new(),
            had_output: false,
            heading: None,
            regions: Vec::new(),
            table: None,
            lists: Vec::new(),
        }
    }

    /// True when any styled text has been painted since the last checkpoint.
    pub fn had_output(&self) -> bool {
        self.had_output
    }

    /// Bring the cursor to a known position (column 0, nothing withheld) so
    /// prompts and info lines can be printed safely.  Never called inside a
    /// sync window.
    pub fn checkpoint<W: Write>(&mut self, term: &mut Term<W>) {
        self.flush_word(term);
        if let Some((level, spans)) = self.heading.take() {
            // A checkpoint mid-heading paints what arrived, unsized.
            self.paint_heading_plain(term, level, &spans);
        }
        if self.col > 0 {
            self.emit_newline(term);
        }
        term.flush();
        self.had_output = false;
    }

    /// Close every pending construct at end of turn.
    pub fn finalize<W: Write>(&mut self, term: &mut Term<W>) {
        self.flush_word(term);
        if let Some((level, spans)) = self.heading.take() {
            self.paint_heading(term, level, &spans);
        }
        if self.table.is_some() {
            let aligns = Vec::new();
            self.paint_table(term, aligns);
        }
        while let Some(kind) = self.regions.last().map(|r| r.kind.clone()) {
            match kind {
                RegionKind::Code { lang } => self.end_code_block(term, &lang),
                RegionKind::Div { class } => self.end_div(term, &class),
                RegionKind::Quote => self.end_quote(term),
            }
        }
        if self.col > 0 {
            self.emit_newline(term);
        }
        self.style_stack.truncate(1);
        term.flush();
    }

    // ── Event dispatch ───────────────────────────────────────────────────────

    pub fn handle<W: Write>(&mut self, event: &MdEvent, term: &mut Term<W>) {
        match event {
            MdEvent::Text(text) => self.text(term, text),
            MdEvent::SoftBreak => self.soft_break(term),
            MdEvent::InlineStart(tag) => self.inline_start(term, tag),
            MdEvent::InlineEnd(tag) => self.inline_end(term, tag),
            MdEvent::BlockStart(block) => self.block_start(term, block),
            MdEvent::BlockEnd(block) => self.block_end(term, block),
            MdEvent::TableEnd { aligns } => self.paint_table(term, aligns.clone()),
        }
    }

    fn block_start<W: Write>(&mut self, term: &mut Term<W>, block: &Block) {
        match block {
            Block::Paragraph => {}
            Block::Heading { level } => {
                self.heading = Some((*level, Vec::new()));
            }
            Block::CodeBlock { lang } => {
                self.push_region(RegionKind::Code { lang: lang.clone() }, 0);
            }
            Block::Div { class } => {
                // Border + padding narrow the nested renderer.
                self.push_region(RegionKind::Div { class: class.clone() }, 3);
            }
            Block::BlockQuote => {
                self.push_region(RegionKind::Quote, 2);
                let green = self.current_style().merge(&Style::fg(Color::DarkGreen));
                self.style_stack.push(green);
            }
            Block::List { start } => {
                self.lists.push(ListState { next: *start });
            }
            Block::Item { task } => self.item_marker(term, *task),
            Block::Table => {
                self.table = Some(TableBuf::default());
            }
            Block::TableHead => {
                if let Some(t) = &mut self.table {
                    t.in_head = true;
                }
            }
            Block::TableRow => {
                if let Some(t) = &mut self.table {
                    t.current_row = Vec::new();
                }
            }
            Block::TableCell => {
                if let Some(t) = &mut self.table {
                    t.current_row.push(Vec::new());
                    t.in_cell = true;
                }
            }
            Block::ThematicBreak => {}
        }
    }

    fn block_end<W: Write>(&mut self, term: &mut Term<W>, block: &Block) {
        match block {
            Block::Paragraph => {
                self.flush_word(term);
                if self.col > 0 {
                    self.emit_newline(term);
                }
                self.emit_newline(term);
            }
            Block::Heading { .. } => {
                self.flush_word(term);
                if let Some((level, spans)) = self.heading.take() {
                    self.paint_heading(term, level, &spans);
                }
            }
            Block::CodeBlock { .. } => {
                if let Some(Region { kind: RegionKind::Code { lang }, .. }) = self.regions.last() {
                    let lang = lang.clone();
                    self.end_code_block(term, &lang);
                }
            }
            Block::Div { .. } => {
                if let Some(Region { kind: RegionKind::Div { class }, .. }) = self.regions.last() {
                    let class = class.clone();
                    self.end_div(term, &class);
                }
            }
            Block::BlockQuote => {
                if matches!(self.regions.last(), Some(Region { kind: RegionKind::Quote, .. })) {
                    self.flush_word(term);
                    self.style_pop();
                    self.end_quote(term);
                }
            }
            Block::List { .. } => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.emit_newline(term);
                }
            }
            Block::Item { .. } => {
                self.flush_word(term);
                if self.col > 0 {
                    self.emit_newline(term);
                }
            }
            Block::TableHead => {
                if let Some(t) = &mut self.table {
                    t.in_head = false;
                }
            }
            Block::TableRow => {
                if let Some(t) = &mut self.table {
                    if !t.in_head {
                        let row = std::mem::take(&mut t.current_row);
                        t.rows.push(row);
                    }
                }
            }
            Block::TableCell => {
                if let Some(t) = &mut self.table {
                    t.in_cell = false;
                    if t.in_head {
                        if let Some(cell) = t.current_row.pop() {
                            t.header.push(cell);
                        }
                    }
                }
            }
            Block::Table => {}
            Block::ThematicBreak => self.thematic_break(term),
        }
    }

    // ── Inline styles ────────────────────────────────────────────────────────

    fn current_style(&self) -> Style {
        *self.style_stack.last().expect("base style")
    }

    fn style_pop(&mut self) {
        if self.style_stack.len() > 1 {
            self.style_stack.pop();
        }
    }

    fn inline_start<W: Write>(&mut self, term: &mut Term<W>, tag: &Inline) {
        self.flush_word(term);
        let layer = match tag {
            Inline::Strong => Style::bold(),
            Inline::Emphasis => Style { italic: true, ..Style::default() },
            Inline::Strikethrough => Style { strike: true, ..Style::default() },
            Inline::Code => Style::fg(Color::Yellow),
            Inline::Link { .. } => Style {
                underline: true,
                fg: Some(Color::Cyan),
                ..Style::default()
            },
            Inline::Image { .. } => Style {
                italic: true,
                fg: Some(Color::Magenta),
                ..Style::default()
            },
        };
        let merged = self.current_style().merge(&layer);
        self.style_stack.push(merged);
    }

    fn inline_end<W: Write>(&mut self, term: &mut Term<W>, tag: &Inline) {
        self.flush_word(term);
        self.style_pop();
        // Show link destinations after the link text.
        if let Inline::Link { dest } = tag {
            if !dest.is_empty() && self.table.is_none() && self.heading.is_none() {
                let grey = Style::fg(Color::DarkGrey);
                self.wrapped_emit(term, &format!(" ({dest})"), grey);
            }
        }
    }

    // ── Text flow ────────────────────────────────────────────────────────────

    fn in_code_region(&self) -> bool {
        matches!(self.regions.last(), Some(Region { kind: RegionKind::Code { .. }, .. }))
    }

    fn text<W: Write>(&mut self, term: &mut Term<W>, text: &str) {
        if self.in_code_region() {
            // Raw echo with uniform tab expansion; the repaint rebuilds the
            // block from the capture.
            for c in text.chars() {
                match c {
                    '\n' => self.emit_newline(term),
                    '\t' => self.emit(term, "    "),
                    _ => self.emit(term, &c.to_string()),
                }
            }
            return;
        }
        for c in text.chars() {
            self.text_char(term, c);
        }
    }

    fn text_char<W: Write>(&mut self, term: &mut Term<W>, c: char) {
        if c == ' ' {
            self.flush_word(term);
            self.append_piece(term, " ");
            return;
        }
        self.word.push(c);
        // Pathologically long words hard-break at the width.
        if visible_width(&self.word) >= self.width {
            self.flush_word(term);
        }
    }

    fn soft_break<W: Write>(&mut self, term: &mut Term<W>) {
        self.flush_word(term);
        if matches!(self.regions.last(), Some(Region { kind: RegionKind::Quote, .. })) {
            // Quotes keep their line structure for the bar prefix.
            self.emit_newline(term);
        } else {
            self.append_piece(term, " ");
        }
    }

    /// Emit the buffered word in the current style, wrapping first when it
    /// does not fit the remaining columns.
    fn flush_word<W: Write>(&mut self, term: &mut Term<W>) {
        if self.word.is_empty() {
            return;
        }
        let word = std::mem::take(&mut self.word);
        let style = self.current_style();
        self.wrapped_emit(term, &word, style);
    }

    /// Route a finished piece to the heading buffer, the table cell, or the
    /// terminal, wrapping as needed.
    fn append_piece<W: Write>(&mut self, term: &mut Term<W>, piece: &str) {
        let style = self.current_style();
        self.wrapped_emit(term, piece, style);
    }

    fn wrapped_emit<W: Write>(&mut self, term: &mut Term<W>, piece: &str, style: Style) {
        if let Some((_, spans)) = &mut self.heading {
            spans.push((piece.to_string(), style));
            return;
        }
        if let Some(t) = &mut self.table {
            if t.in_cell {
                if let Some(cell) = t.current_row.last_mut() {
                    cell.push((piece.to_string(), style));
                }
            }
            return;
        }
        let w = visible_width(piece);
        if self.col + w > self.width && self.col > 0 {
            self.emit_newline(term);
            if piece == " " {
                return; // a wrapping space dissolves into the break
            }
        }
        self.emit(term, &style.apply(piece));
        self.col += w;
        self.had_output = true;
    }

    // ── Raw emission + capture mirroring ─────────────────────────────────────

    /// Write bytes to the terminal, mirroring them into the active capture.
    /// Column accounting is done by callers that know the visible width.
    fn emit<W: Write>(&mut self, term: &mut Term<W>, s: &str) {
        if let Some(region) = self.regions.last_mut() {
            region.partial.push_str(s);
        }
        term.write_str(s);
    }

    fn emit_newline<W: Write>(&mut self, term: &mut Term<W>) {
        if let Some(region) = self.regions.last_mut() {
            let rows = screen_rows(&region.partial, self.base_width);
            region.echo_rows += rows;
            let line = std::mem::take(&mut region.partial);
            region.lines.push(line);
        }
        term.newline();
        self.col = 0;
    }

    // ── Regions ──────────────────────────────────────────────────────────────

    fn push_region(&mut self, kind: RegionKind, narrow: usize) {
        // Start regions at column 0.
        self.regions.push(Region {
            kind,
            lines: Vec::new(),
            partial: String::new(),
            echo_rows: 0,
            width_before: self.width,
        });
        self.width = self.width.saturating_sub(narrow).max(10);
    }

    /// Close the top region: flush its partial line, clear its echo inside a
    /// sync window, and return its captured lines with the cursor parked at
    /// the start of the cleared area.
    fn begin_repaint<W: Write>(&mut self, term: &mut Term<W>) -> Region {
        let mut region = self.regions.pop().expect("open region");
        self.width = region.width_before;
        let on_partial_row = !region.partial.is_empty() || self.col > 0;
        if !region.partial.is_empty() {
            let rows = screen_rows(&region.partial, self.base_width);
            region.echo_rows += rows;
            let line = std::mem::take(&mut region.partial);
            region.lines.push(line);
        }
        term.begin_sync();
        let up = if on_partial_row {
            region.echo_rows.saturating_sub(1)
        } else {
            region.echo_rows
        };
        term.clear_lines_up(up as u16);
        self.col = 0;
        region
    }

    /// Repaint `lines` (one screen row each) and book them against the parent
    /// region so nested repaints stay consistent.
    fn paint_lines<W: Write>(&mut self, term: &mut Term<W>, lines: Vec<String>) {
        for line in lines {
            self.emit(term, &line);
            self.emit_newline(term);
        }
        self.had_output = true;
    }

    fn border_glyphs(&self) -> (&'static str, &'static str, &'static str, &'static str, &'static str, &'static str) {
        if self.cfg.ascii {
            ("+", "+", "+", "+", "-", "|")
        } else {
            ("┌", "┐", "└", "┘", "─", "│")
        }
    }

    fn end_code_block<W: Write>(&mut self, term: &mut Term<W>, lang: &str) {
        let region = self.begin_repaint(term);
        let mut content = region.lines;
        while content.last().map(|l| l.is_empty()).unwrap_or(false) {
            content.pop();
        }

        let (tl, tr, bl, br, hbar, vbar) = self.border_glyphs();
        let border_style = Style::fg(Color::DarkGrey);
        let code_style = Style::fg(Color::Cyan);

        let inner = content
            .iter()
            .map(|l| visible_width(l))
            .max()
            .unwrap_or(0)
            .clamp(1, self.width.saturating_sub(4));

        let mut painted = Vec::with_capacity(content.len() + 2);
        let label = if lang.is_empty() {
            hbar.repeat(inner + 2)
        } else {
            let tail_len = (inner + 2).saturating_sub(lang.len() + 3);
            format!("{} {} {}", hbar, lang, hbar.repeat(tail_len))
        };
        painted.push(border_style.apply(&format!("{tl}{label}{tr}")));
        for line in &content {
            let clipped = clip_display(line, inner);
            let pad = inner - visible_width(&clipped);
            painted.push(format!(
                "{} {}{} {}",
                border_style.apply(vbar),
                code_style.apply(&clipped),
                " ".repeat(pad),
                border_style.apply(vbar),
            ));
        }
        painted.push(border_style.apply(&format!("{bl}{}{br}", hbar.repeat(inner + 2))));

        self.paint_lines(term, painted);
        term.end_sync();
        self.emit_newline(term);
    }

    fn end_div<W: Write>(&mut self, term: &mut Term<W>, class: &str) {
        let region = self.begin_repaint(term);
        let mut content = region.lines;
        while content.last().map(|l| visible_width(l) == 0).unwrap_or(false) {
            content.pop();
        }

        let (tl, tr, bl, br, hbar, vbar) = self.border_glyphs();
        let border_style = Style::fg(Color::DarkGrey);

        let inner = content
            .iter()
            .map(|l| visible_width(l))
            .max()
            .unwrap_or(0)
            .clamp(1, self.width.saturating_sub(4));

        let mut painted = Vec::with_capacity(content.len() + 2);
        let label = if class.is_empty() || !self.cfg.label_divs {
            hbar.repeat(inner + 2)
        } else {
            let tail_len = (inner + 2).saturating_sub(class.len() + 3);
            format!("{} {} {}", hbar, class, hbar.repeat(tail_len))
        };
        painted.push(border_style.apply(&format!("{tl}{label}{tr}")));
        for line in &content {
            let clipped = clip_display(line, inner);
            let pad = inner - visible_width(&clipped);
            painted.push(format!(
                "{} {clipped}{} {}",
                border_style.apply(vbar),
                " ".repeat(pad),
                border_style.apply(vbar),
            ));
        }
        painted.push(border_style.apply(&format!("{bl}{}{br}", hbar.repeat(inner + 2))));

        self.paint_lines(term, painted);
        term.end_sync();
        self.emit_newline(term);
    }

    fn end_quote<W: Write>(&mut self, term: &mut Term<W>) {
        let region = self.begin_repaint(term);
        let mut content = region.lines;
        while content.last().map(|l| visible_width(l) == 0).unwrap_or(false) {
            content.pop();
        }
        let bar = if self.cfg.ascii { "| " } else { "▌ " };
        let bar_style = Style::fg(Color::DarkGreen);
        let painted = content
            .into_iter()
            .map(|line| format!("{}{line}", bar_style.apply(bar)))
            .collect();
        self.paint_lines(term, painted);
        term.end_sync();
        self.emit_newline(term);
    }

    // ── Headings ─────────────────────────────────────────────────────────────

    fn heading_base_style(level: u8) -> Style {
        match level {
            1 => Style { bold: true, underline: true, fg: Some(Color::Blue), ..Style::default() },
            2 => Style { bold: true, fg: Some(Color::Blue), ..Style::default() },
            3 => Style { bold: true, italic: true, fg: Some(Color::Cyan), ..Style::default() },
            4 => Style { italic: true, fg: Some(Color::Cyan), ..Style::default() },
            _ => Style::bold(),
        }
    }

    fn heading_size(level: u8) -> Option<TextSize> {
        match level {
            1 => Some(TextSize::integer(2)),
            2 => Some(TextSize { num: 3, den: 2 }),
            _ => None,
        }
    }

    fn paint_heading<W: Write>(&mut self, term: &mut Term<W>, level: u8, spans: &[(String, Style)]) {
        // Sizing cannot survive inside captured borders (cell alignment
        // breaks with scaled glyphs), so it applies only at top level.
        let ts = if self.cfg.text_sizing && self.regions.is_empty() {
            Self::heading_size(level)
        } else {
            None
        };
        match ts {
            Some(ts) => {
                let base = Self::heading_base_style(level);
                for (text, style) in spans {
                    let merged = base.merge(style);
                    let sized = emit_sized(text, &merged, ts, self.width);
                    self.emit(term, &sized);
                }
                self.had_output = true;
                self.emit_newline(term);
                self.emit_newline(term);
            }
            None => self.paint_heading_plain(term, level, spans),
        }
    }

    fn paint_heading_plain<W: Write>(
        &mut self,
        term: &mut Term<W>,
        level: u8,
        spans: &[(String, Style)],
    ) {
        let base = Self::heading_base_style(level);
        for (text, style) in spans {
            let merged = base.merge(style);
            let w = visible_width(text);
            if self.col + w > self.width && self.col > 0 {
                self.emit_newline(term);
            }
            self.emit(term, &merged.apply(text));
            self.col += w;
        }
        self.had_output = true;
        if self.col > 0 {
            self.emit_newline(term);
        }
        self.emit_newline(term);
    }

    // ── Lists ────────────────────────────────────────────────────────────────

    fn item_marker<W: Write>(&mut self, term: &mut Term<W>, task: Option<bool>) {
        let level = self.lists.len().saturating_sub(1);
        let indent = " ".repeat(self.cfg.indent_step * level);
        let marker = match self.lists.last_mut().and_then(|s| s.next.as_mut()) {
            Some(n) => {
                let m = format!("{n}. ");
                *n += 1;
                m
            }
            None => format!("{} ", self.cfg.bullet),
        };
        let checkbox = match task {
            Some(true) => format!("{} ", self.cfg.checkbox_checked),
            Some(false) => format!("{} ", self.cfg.checkbox_unchecked),
            None => String::new(),
        };
        let piece = format!("{indent}{marker}{checkbox}");
        let w = visible_width(&piece);
        let style = Style::fg(Color::Blue);
        self.emit(term, &style.apply(&piece));
        self.col += w;
        self.had_output = true;
    }

    // ── Thematic break ───────────────────────────────────────────────────────

    fn thematic_break<W: Write>(&mut self, term: &mut Term<W>) {
        self.flush_word(term);
        if self.col > 0 {
            self.emit_newline(term);
        }
        let bar = if self.cfg.ascii { "-" } else { "─" };
        let fill = bar.repeat(self.width);
        self.emit(term, &Style::fg(Color::DarkGrey).apply(&fill));
        self.col += self.width;
        self.had_output = true;
        self.emit_newline(term);
        self.emit_newline(term);
    }

    // ── Tables ───────────────────────────────────────────────────────────────

    fn paint_table<W: Write>(&mut self, term: &mut Term<W>, aligns: Vec<Align>) {
        let Some(table) = self.table.take() else {
            return;
        };
        if self.col > 0 {
            self.emit_newline(term);
        }

        let columns = table
            .header
            .len()
            .max(table.rows.iter().map(|r| r.len()).max().unwrap_or(0));
        if columns == 0 {
            return;
        }

        // Column widths from the widest cell, then shrink the widest column
        // until the table fits the available width.
        let mut widths = vec![1usize; columns];
        let all_rows: Vec<&Vec<CellSpans>> =
            std::iter::once(&table.header).chain(table.rows.iter()).collect();
        for row in &all_rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell_plain_width(cell));
            }
        }
        let chrome = 3 * (columns - 1) + 4;
        while widths.iter().sum::<usize>() + chrome > self.width {
            let (idx, max) = widths
                .iter()
                .enumerate()
                .max_by_key(|(_, w)| **w)
                .map(|(i, w)| (i, *w))
                .unwrap_or((0, 0));
            if max <= 3 {
                break;
            }
            widths[idx] = max - 1;
        }

        let ascii = self.cfg.ascii;
        let border_style = Style::fg(Color::DarkGrey);
        let hbar = if ascii { "-" } else { "─" };
        let sep = |l: &str, m: &str, r: &str| -> String {
            let body = widths
                .iter()
                .map(|w| hbar.repeat(w + 2))
                .collect::<Vec<_>>()
                .join(m);
            border_style.apply(&format!("{l}{body}{r}"))
        };
        let (top, mid, bottom) = if ascii {
            (sep("+", "+", "+"), sep("+", "+", "+"), sep("+", "+", "+"))
        } else {
            (sep("┌", "┬", "┐"), sep("├", "┼", "┤"), sep("└", "┴", "┘"))
        };

        let vbar = border_style.apply(if ascii { "|" } else { "│" });
        let render_row = |row: &[CellSpans], bold: bool| -> String {
            let mut parts = Vec::with_capacity(columns);
            for i in 0..columns {
                let cell = row.get(i).cloned().unwrap_or_default();
                let align = aligns.get(i).copied().unwrap_or_default();
                parts.push(render_cell(&cell, widths[i], align, bold));
            }
            format!("{vbar} {} {vbar}", parts.join(&format!(" {vbar} ")))
        };

        let mut lines = Vec::with_capacity(all_rows.len() + 3);
        lines.push(top);
        if !table.header.is_empty() {
            lines.push(render_row(&table.header, true));
            lines.push(mid);
        }
        for row in &table.rows {
            lines.push(render_row(row, false));
        }
        lines.push(bottom);

        for line in lines {
            self.emit(term, &line);
            self.emit_newline(term);
        }
        self.had_output = true;
        self.emit_newline(term);
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Screen rows a rendered line occupies at the given terminal width.
fn screen_rows(line: &str, term_width: usize) -> usize {
    let w = visible_width(line);
    if term_width == 0 || w == 0 {
        return 1;
    }
    w.div_ceil(term_width)
}

/// Truncate a styled line to `max_cols` display columns, keeping escape
/// sequences intact and never splitting a character.
fn clip_display(line: &str, max_cols: usize) -> String {
    if visible_width(line) <= max_cols {
        return line.to_string();
    }
    let mut out = String::new();
    let mut width = 0usize;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            out.push(c);
            if let Some(&next) = chars.peek() {
                out.push(next);
                chars.next();
                if next == '[' {
                    for f in chars.by_ref() {
                        out.push(f);
                        if ('\u{40}'..='\u{7e}').contains(&f) {
                            break;
                        }
                    }
                }
            }
            continue;
        }
        let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w > max_cols {
            break;
        }
        out.push(c);
        width += w;
    }
    // Terminate any open style so the border is not bled into.
    out.push_str("\x1b[0m");
    out
}

fn cell_plain_width(cell: &CellSpans) -> usize {
    cell.iter().map(|(t, _)| visible_width(t)).sum()
}

fn render_cell(cell: &CellSpans, width: usize, align: Align, bold: bool) -> String {
    let mut styled = String::new();
    let mut used = 0usize;
    for (text, style) in cell {
        let remaining = width.saturating_sub(used);
        if remaining == 0 {
            break;
        }
        let clipped = clip_to_width(text, remaining);
        let w = visible_width(&clipped);
        let style = if bold {
            style.merge(&Style::bold())
        } else {
            *style
        };
        styled.push_str(&style.apply(&clipped));
        used += w;
    }
    let pad = width.saturating_sub(used);
    match align {
        Align::Left => format!("{styled}{}", " ".repeat(pad)),
        Align::Right => format!("{}{styled}", " ".repeat(pad)),
        Align::Center => {
            let left = pad / 2;
            format!("{}{styled}{}", " ".repeat(left), " ".repeat(pad - left))
        }
    }
}

fn clip_to_width(text: &str, max_cols: usize) -> String {
    let mut out = String::new();
    let mut width = 0usize;
    for c in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w > max_cols {
            break;
        }
        out.push(c);
        width += w;
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
