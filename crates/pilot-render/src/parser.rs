// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Incremental markdown parser.
//!
//! Converts streamed text fragments into [`MdEvent`]s while holding block and
//! inline state across arbitrary chunk boundaries: a code fence opened in one
//! fragment stays open in the next, a `**` split across fragments still
//! toggles strong, a table survives row-by-row delivery.  Ecosystem pull
//! parsers need the complete input up front, which is exactly what a token
//! stream cannot provide.
//!
//! Paragraph and heading text is released as soon as it is seen; the parser
//! withholds only the characters whose meaning is still ambiguous (a lone
//! `*` that may become `**`, a line prefix that may become a fence).

use crate::event::{Align, Block, Inline, MdEvent};

// ─── Inline scanner ───────────────────────────────────────────────────────────

/// What a partially-seen inline construct is waiting for.
#[derive(Debug, Clone, PartialEq)]
enum InlineHold {
    /// `*` whose run length is not yet known
    Star,
    /// `~` run
    Tilde,
    /// `!` that may start an image
    Bang,
    /// Backslash escape waiting for the escaped character
    Escape,
    /// Code span content, accumulated until the closing backtick
    Code(String),
    /// Link or image being collected: `[text](dest)`.
    /// `dest` is `None` while inside the brackets, `Some` after `]`;
    /// a leading NUL in `dest` marks "inside the parentheses".
    Link { image: bool, text: String, dest: Option<String> },
}

/// Incremental inline scanner for one leaf block.
///
/// Emits text immediately; style markers toggle open/close events.  Holds
/// are flushed literally when the construct never completes.
#[derive(Debug, Default)]
struct InlineScanner {
    hold: Option<InlineHold>,
    strong_open: bool,
    emphasis_open: bool,
    strike_open: bool,
    text_buf: String,
}

impl InlineScanner {
    fn push_char(&mut self, c: char, out: &mut Vec<MdEvent>) {
        if let Some(hold) = self.hold.take() {
            match hold {
                InlineHold::Star => {
                    if c == '*' {
                        self.flush_text(out);
                        self.toggle_strong(out);
                    } else if c == ' ' && !self.emphasis_open {
                        // A lone star before whitespace never opens emphasis.
                        self.text_buf.push('*');
                        self.push_char(c, out);
                    } else {
                        self.flush_text(out);
                        self.toggle_emphasis(out);
                        self.push_char(c, out);
                    }
                    return;
                }
                InlineHold::Tilde => {
                    if c == '~' {
                        self.flush_text(out);
                        self.toggle_strike(out);
                    } else {
                        self.text_buf.push('~');
                        self.push_char(c, out);
                    }
                    return;
                }
                InlineHold::Bang => {
                    if c == '[' {
                        self.hold = Some(InlineHold::Link {
                            image: true,
                            text: String::new(),
                            dest: None,
                        });
                    } else {
                        self.text_buf.push('!');
                        self.push_char(c, out);
                    }
                    return;
                }
                InlineHold::Escape => {
                    if c.is_ascii_punctuation() {
                        self.text_buf.push(c);
                    } else {
                        self.text_buf.push('\\');
                        self.text_buf.push(c);
                    }
                    self.flush_text(out);
                    return;
                }
                InlineHold::Code(mut content) => {
                    if c == '`' {
                        self.flush_text(out);
                        out.push(MdEvent::InlineStart(Inline::Code));
                        out.push(MdEvent::Text(content));
                        out.push(MdEvent::InlineEnd(Inline::Code));
                    } else {
                        content.push(c);
                        self.hold = Some(InlineHold::Code(content));
                    }
                    return;
                }
                InlineHold::Link { image, mut text, dest } => {
                    match dest {
                        None => {
                            if c == ']' {
                                self.hold = Some(InlineHold::Link {
                                    image,
                                    text,
                                    dest: Some(String::new()),
                                });
                            } else {
                                text.push(c);
                                self.hold = Some(InlineHold::Link { image, text, dest: None });
                            }
                        }
                        Some(d) if d.is_empty() => {
                            if c == '(' {
                                self.hold = Some(InlineHold::Link {
                                    image,
                                    text,
                                    dest: Some("\0".to_string()),
                                });
                            } else {
                                // "](" expected; plain brackets after all.
                                if image {
                                    self.text_buf.push('!');
                                }
                                self.text_buf.push('[');
                                self.text_buf.push_str(&text);
                                self.text_buf.push(']');
                                self.push_char(c, out);
                            }
                        }
                        Some(mut d) => {
                            if c == ')' {
                                let dest = d.trim_start_matches('\0').to_string();
                                self.flush_text(out);
                                let tag = if image {
                                    Inline::Image { dest }
                                } else {
                                    Inline::Link { dest }
                                };
                                out.push(MdEvent::InlineStart(tag.clone()));
                                out.push(MdEvent::Text(text));
                                out.push(MdEvent::InlineEnd(tag));
                            } else {
                                d.push(c);
                                self.hold = Some(InlineHold::Link { image, text, dest: Some(d) });
                            }
                        }
                    }
                    return;
                }
            }
        }

        match c {
            '*' => self.hold = Some(InlineHold::Star),
            '~' => self.hold = Some(InlineHold::Tilde),
            '!' => self.hold = Some(InlineHold::Bang),
            '\\' => self.hold = Some(InlineHold::Escape),
            '`' => self.hold = Some(InlineHold::Code(String::new())),
            '[' => {
                self.hold = Some(InlineHold::Link {
                    image: false,
                    text: String::new(),
                    dest: None,
                })
            }
            _ => {
                self.text_buf.push(c);
                self.flush_text(out);
            }
        }
    }

    fn toggle_strong(&mut self, out: &mut Vec<MdEvent>) {
        if self.strong_open {
            out.push(MdEvent::InlineEnd(Inline::Strong));
        } else {
            out.push(MdEvent::InlineStart(Inline::Strong));
        }
        self.strong_open = !self.strong_open;
    }

    fn toggle_emphasis(&mut self, out: &mut Vec<MdEvent>) {
        if self.emphasis_open {
            out.push(MdEvent::InlineEnd(Inline::Emphasis));
        } else {
            out.push(MdEvent::InlineStart(Inline::Emphasis));
        }
        self.emphasis_open = !self.emphasis_open;
    }

    fn toggle_strike(&mut self, out: &mut Vec<MdEvent>) {
        if self.strike_open {
            out.push(MdEvent::InlineEnd(Inline::Strikethrough));
        } else {
            out.push(MdEvent::InlineStart(Inline::Strikethrough));
        }
        self.strike_open = !self.strike_open;
    }

    fn flush_text(&mut self, out: &mut Vec<MdEvent>) {
        if !self.text_buf.is_empty() {
            out.push(MdEvent::Text(std::mem::take(&mut self.text_buf)));
        }
    }

    /// Resolve the pending hold literally (the construct did not complete on
    /// this line) and flush text.  Open style toggles survive line breaks.
    fn finish_line(&mut self, out: &mut Vec<MdEvent>) {
        match self.hold.take() {
            Some(InlineHold::Star) => self.text_buf.push('*'),
            Some(InlineHold::Tilde) => self.text_buf.push('~'),
            Some(InlineHold::Bang) => self.text_buf.push('!'),
            Some(InlineHold::Escape) => self.text_buf.push('\\'),
            Some(InlineHold::Code(content)) => {
                self.text_buf.push('`');
                self.text_buf.push_str(&content);
            }
            Some(InlineHold::Link { image, text, dest }) => {
                if image {
                    self.text_buf.push('!');
                }
                self.text_buf.push('[');
                self.text_buf.push_str(&text);
                if let Some(d) = dest {
                    self.text_buf.push(']');
                    if let Some(inner) = d.strip_prefix('\0') {
                        self.text_buf.push('(');
                        self.text_buf.push_str(inner);
                    }
                }
            }
            None => {}
        }
        self.flush_text(out);
    }

    /// Close the leaf: resolve holds and close any open styles.
    fn finish(&mut self, out: &mut Vec<MdEvent>) {
        self.finish_line(out);
        if self.strong_open {
            out.push(MdEvent::InlineEnd(Inline::Strong));
            self.strong_open = false;
        }
        if self.emphasis_open {
            out.push(MdEvent::InlineEnd(Inline::Emphasis));
            self.emphasis_open = false;
        }
        if self.strike_open {
            out.push(MdEvent::InlineEnd(Inline::Strikethrough));
            self.strike_open = false;
        }
    }
}

/// Batch helper: inline events for a complete string (table cells).
fn scan_inline(text: &str, out: &mut Vec<MdEvent>) {
    let mut scanner = InlineScanner::default();
    for c in text.chars() {
        scanner.push_char(c, out);
    }
    scanner.finish(out);
}

// ─── Block-level state ────────────────────────────────────────────────────────

/// The leaf block currently receiving streamed text, if any.
#[derive(Debug, Clone, PartialEq)]
enum Leaf {
    Paragraph,
    Heading(u8),
    Quote,
    Item,
    Code { fence_len: usize },
}

/// Per-line parsing phase.
#[derive(Debug, Clone, PartialEq)]
enum LinePhase {
    /// Accumulating the classification prefix into `pending`
    Classify,
    /// Streaming inline content of the open leaf
    Inline,
    /// Raw code-fence content
    CodeText,
    /// Line-start backtick run inside a fence (possible closing fence)
    CodeFenceMaybeEnd(usize),
    /// Fence opener seen; accumulating the info string until newline
    CodeFenceInfo,
    /// `:::` seen; accumulating the div class until newline
    DivFence,
    /// Table candidate line buffered raw until newline
    TableLine,
}

#[derive(Debug)]
struct ListCtx {
    indent: usize,
    ordered: bool,
}

#[derive(Debug, Default)]
struct TableCtx {
    /// Raw header line stashed until the delimiter row confirms a table.
    pending_header: Option<String>,
    started: bool,
    aligns: Vec<Align>,
}

/// Streaming markdown parser; one instance per rendered turn.
pub struct StreamParser {
    out: Vec<MdEvent>,
    phase: LinePhase,
    /// Classification buffer for the current line prefix
    pending: String,
    leaf: Option<Leaf>,
    scanner: InlineScanner,
    /// A paragraph/quote line ended; emit SoftBreak if it continues.
    pending_break: bool,
    list_stack: Vec<ListCtx>,
    div_depth: usize,
    table: TableCtx,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamParser {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            phase: LinePhase::Classify,
            pending: String::new(),
            leaf: None,
            scanner: InlineScanner::default(),
            pending_break: false,
            list_stack: Vec::new(),
            div_depth: 0,
            table: TableCtx::default(),
        }
    }

    /// Feed a fragment; returns the events it released.
    pub fn push_str(&mut self, fragment: &str) -> Vec<MdEvent> {
        for c in fragment.chars() {
            self.push_char(c);
        }
        std::mem::take(&mut self.out)
    }

    /// End of stream: flush holds and close every open construct.
    pub fn finish(&mut self) -> Vec<MdEvent> {
        match self.phase {
            // An empty line start inside a fence holds nothing.
            LinePhase::CodeFenceMaybeEnd(0) => self.phase = LinePhase::Classify,
            LinePhase::CodeFenceMaybeEnd(n) => {
                self.out.push(MdEvent::Text("`".repeat(n)));
                self.phase = LinePhase::Classify;
            }
            _ => {
                if !matches!(self.phase, LinePhase::Classify) || !self.pending.is_empty() {
                    self.end_line();
                }
            }
        }
        self.close_table();
        self.close_leaf();
        self.close_lists();
        while self.div_depth > 0 {
            self.out.push(MdEvent::BlockEnd(Block::Div { class: String::new() }));
            self.div_depth -= 1;
        }
        std::mem::take(&mut self.out)
    }

    // ── Character pump ───────────────────────────────────────────────────────

    fn push_char(&mut self, c: char) {
        if c == '\n' {
            self.end_line();
            return;
        }
        match &mut self.phase {
            LinePhase::Classify => {
                self.pending.push(c);
                self.try_classify();
            }
            LinePhase::Inline => {
                self.scanner.push_char(c, &mut self.out);
            }
            LinePhase::CodeText => {
                self.out.push(MdEvent::Text(c.to_string()));
            }
            LinePhase::CodeFenceMaybeEnd(count) => {
                if c == '`' {
                    *count += 1;
                } else {
                    // Not a closing fence: release the held backticks as code
                    // text and continue raw.
                    let held = "`".repeat(*count);
                    self.out.push(MdEvent::Text(held + &c.to_string()));
                    self.phase = LinePhase::CodeText;
                }
            }
            LinePhase::CodeFenceInfo | LinePhase::DivFence | LinePhase::TableLine => {
                self.pending.push(c);
            }
        }
    }

    // ── Line classification ──────────────────────────────────────────────────

    /// Attempt to classify the line from the accumulated prefix.  Returns
    /// silently (keeping [`LinePhase::Classify`]) while the prefix is still
    /// ambiguous; otherwise switches phase and emits block-start events.
    fn try_classify(&mut self) {
        let pending = self.pending.clone();
        let indent = pending.len() - pending.trim_start_matches(' ').len();
        let rest = &pending[indent..];
        if rest.is_empty() {
            return;
        }
        let first = rest.chars().next().unwrap();

        // A pending table must be resolved before any non-row line opens
        // something else.
        if (self.table.started || self.table.pending_header.is_some()) && first != '|' {
            self.close_table();
        }

        match first {
            '>' => {
                if rest.len() < 2 {
                    return; // the optional space after '>' decides the offset
                }
                self.open_quote();
                let content = rest[1..].strip_prefix(' ').unwrap_or(&rest[1..]).to_string();
                self.start_inline(&content);
            }
            '#' => {
                let hashes = rest.chars().take_while(|&c| c == '#').count();
                if hashes == rest.len() {
                    return;
                }
                let after: &str = &rest[hashes..];
                if hashes <= 6 && after.starts_with(' ') {
                    self.close_leaf();
                    self.close_lists();
                    self.leaf = Some(Leaf::Heading(hashes as u8));
                    self.out.push(MdEvent::BlockStart(Block::Heading { level: hashes as u8 }));
                    self.start_inline(after.trim_start_matches(' '));
                } else {
                    self.begin_streaming_paragraph(rest);
                }
            }
            '`' => {
                let ticks = rest.chars().take_while(|&c| c == '`').count();
                if ticks == rest.len() {
                    if ticks >= 3 {
                        self.close_leaf();
                        self.close_lists();
                        self.pending = String::new();
                        self.phase = LinePhase::CodeFenceInfo;
                    }
                    return;
                }
                self.begin_streaming_paragraph(rest);
            }
            ':' => {
                let colons = rest.chars().take_while(|&c| c == ':').count();
                if colons == rest.len() {
                    if colons >= 3 {
                        self.close_leaf();
                        self.close_lists();
                        self.pending = String::new();
                        self.phase = LinePhase::DivFence;
                    }
                    return;
                }
                self.begin_streaming_paragraph(rest);
            }
            '|' => {
                self.close_leaf();
                self.close_lists();
                self.pending = rest.to_string();
                self.phase = LinePhase::TableLine;
            }
            '-' | '*' | '+' => {
                let run = rest.chars().take_while(|&c| c == first).count();
                if run == rest.len() {
                    // A bare marker run: list bullet, thematic break, or
                    // emphasis — the next character (or newline) decides.
                    if first == '+' && run > 1 {
                        self.begin_streaming_paragraph(rest);
                    }
                    return;
                }
                if run == 1 && rest[1..].starts_with(' ') {
                    self.classify_list_item(indent, false, None, &rest[2..]);
                    return;
                }
                self.begin_streaming_paragraph(rest);
            }
            '_' => {
                let run = rest.chars().take_while(|&c| c == '_').count();
                if run == rest.len() {
                    return;
                }
                self.begin_streaming_paragraph(rest);
            }
            d if d.is_ascii_digit() => {
                let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
                if digits == rest.len() {
                    return;
                }
                let after: &str = &rest[digits..];
                if digits <= 9 && after.starts_with(". ") {
                    let start: u64 = rest[..digits].parse().unwrap_or(1);
                    self.classify_list_item(indent, true, Some(start), &after[2..]);
                } else if after != "." {
                    self.begin_streaming_paragraph(rest);
                }
            }
            _ => {
                self.begin_streaming_paragraph(rest);
            }
        }
    }

    /// List items may carry a task marker (`[ ] ` / `[x] `) after the bullet;
    /// the marker needs 4 characters of lookahead, so classification waits.
    fn classify_list_item(&mut self, indent: usize, ordered: bool, start: Option<u64>, body: &str) {
        if body.starts_with('[') && body.len() < 4 {
            return;
        }
        let (task, content) = match body.get(..4) {
            Some("[ ] ") => (Some(false), &body[4..]),
            Some("[x] ") | Some("[X] ") => (Some(true), &body[4..]),
            _ => (None, body),
        };
        self.close_leaf();
        self.adjust_lists(indent, ordered, start);
        self.leaf = Some(Leaf::Item);
        self.out.push(MdEvent::BlockStart(Block::Item { task }));
        self.start_inline(content);
    }

    /// Open/close list levels so the top of the stack matches `indent`.
    fn adjust_lists(&mut self, indent: usize, ordered: bool, start: Option<u64>) {
        while let Some(top) = self.list_stack.last() {
            if indent < top.indent {
                self.list_stack.pop();
                self.out.push(MdEvent::BlockEnd(Block::List { start: None }));
            } else {
                break;
            }
        }
        let need_new = match self.list_stack.last() {
            None => true,
            Some(top) => indent > top.indent || top.ordered != ordered,
        };
        if need_new {
            if let Some(top) = self.list_stack.last() {
                if indent == top.indent {
                    // Marker type changed at the same level: sibling list.
                    self.list_stack.pop();
                    self.out.push(MdEvent::BlockEnd(Block::List { start: None }));
                }
            }
            self.list_stack.push(ListCtx { indent, ordered });
            let start = if ordered { start.or(Some(1)) } else { None };
            self.out.push(MdEvent::BlockStart(Block::List { start }));
        }
    }

    /// Open or continue a paragraph and feed `content` through the scanner
    /// without touching the line phase.  Used by batch paths (unresolved
    /// prefixes at line end, rejected table headers).
    fn paragraph_feed(&mut self, content: &str) {
        match self.leaf {
            Some(Leaf::Paragraph) | Some(Leaf::Quote) => {
                if self.pending_break {
                    self.out.push(MdEvent::SoftBreak);
                    self.pending_break = false;
                }
            }
            _ => {
                self.close_leaf();
                self.close_lists();
                self.leaf = Some(Leaf::Paragraph);
                self.out.push(MdEvent::BlockStart(Block::Paragraph));
            }
        }
        for c in content.chars() {
            self.scanner.push_char(c, &mut self.out);
        }
    }

    /// Streaming variant: open/continue the paragraph and switch the line
    /// into inline streaming.
    fn begin_streaming_paragraph(&mut self, content: &str) {
        let content = content.to_string();
        self.paragraph_feed(&content);
        self.pending.clear();
        self.phase = LinePhase::Inline;
    }

    fn open_quote(&mut self) {
        match self.leaf {
            Some(Leaf::Quote) => {
                if self.pending_break {
                    self.out.push(MdEvent::SoftBreak);
                    self.pending_break = false;
                }
            }
            _ => {
                self.close_leaf();
                self.close_lists();
                self.leaf = Some(Leaf::Quote);
                self.out.push(MdEvent::BlockStart(Block::BlockQuote));
            }
        }
    }

    /// Switch to inline streaming, feeding the already-buffered content.
    fn start_inline(&mut self, content: &str) {
        self.pending.clear();
        self.phase = LinePhase::Inline;
        self.pending_break = false;
        for c in content.chars() {
            self.scanner.push_char(c, &mut self.out);
        }
    }

    // ── Line end ─────────────────────────────────────────────────────────────

    fn end_line(&mut self) {
        match std::mem::replace(&mut self.phase, LinePhase::Classify) {
            LinePhase::Classify => {
                let pending = std::mem::take(&mut self.pending);
                let trimmed = pending.trim();
                if trimmed.is_empty() {
                    // Blank line closes the open leaf, lists and table.
                    self.close_table();
                    self.close_leaf();
                    self.close_lists();
                } else if is_thematic_break(trimmed) {
                    self.close_table();
                    self.close_leaf();
                    self.close_lists();
                    self.out.push(MdEvent::BlockStart(Block::ThematicBreak));
                    self.out.push(MdEvent::BlockEnd(Block::ThematicBreak));
                } else {
                    // The prefix never resolved (e.g. "``" or "12"); it is
                    // paragraph text after all.
                    self.paragraph_feed(trimmed);
                    self.end_inline_line();
                }
            }
            LinePhase::Inline => self.end_inline_line(),
            LinePhase::CodeText => {
                self.out.push(MdEvent::Text("\n".into()));
                self.phase = LinePhase::CodeFenceMaybeEnd(0);
            }
            LinePhase::CodeFenceMaybeEnd(count) => {
                let fence_len = match self.leaf {
                    Some(Leaf::Code { fence_len }) => fence_len,
                    _ => 3,
                };
                if count >= fence_len {
                    self.leaf = None;
                    self.out.push(MdEvent::BlockEnd(Block::CodeBlock { lang: String::new() }));
                } else {
                    self.out.push(MdEvent::Text("`".repeat(count) + "\n"));
                    self.phase = LinePhase::CodeFenceMaybeEnd(0);
                }
            }
            LinePhase::CodeFenceInfo => {
                let raw = std::mem::take(&mut self.pending);
                // Extra backticks beyond the opening three extend the fence.
                let extra = raw.chars().take_while(|&c| c == '`').count();
                let lang = raw[extra..].trim().to_string();
                self.leaf = Some(Leaf::Code { fence_len: 3 + extra });
                self.out.push(MdEvent::BlockStart(Block::CodeBlock { lang }));
                self.phase = LinePhase::CodeFenceMaybeEnd(0);
            }
            LinePhase::DivFence => {
                let class = std::mem::take(&mut self.pending).trim().to_string();
                if class.is_empty() && self.div_depth > 0 {
                    self.close_table();
                    self.close_leaf();
                    self.close_lists();
                    self.div_depth -= 1;
                    self.out.push(MdEvent::BlockEnd(Block::Div { class: String::new() }));
                } else {
                    self.div_depth += 1;
                    self.out.push(MdEvent::BlockStart(Block::Div { class }));
                }
            }
            LinePhase::TableLine => {
                let line = std::mem::take(&mut self.pending);
                self.table_line(line);
            }
        }
    }

    fn end_inline_line(&mut self) {
        match self.leaf {
            Some(Leaf::Heading(level)) => {
                self.scanner.finish(&mut self.out);
                self.scanner = InlineScanner::default();
                self.leaf = None;
                self.out.push(MdEvent::BlockEnd(Block::Heading { level }));
            }
            Some(Leaf::Item) => {
                self.scanner.finish(&mut self.out);
                self.scanner = InlineScanner::default();
                self.leaf = None;
                self.out.push(MdEvent::BlockEnd(Block::Item { task: None }));
            }
            Some(Leaf::Paragraph) | Some(Leaf::Quote) => {
                // Keep the leaf open; the next line decides continuation.
                self.scanner.finish_line(&mut self.out);
                self.pending_break = true;
            }
            _ => {}
        }
    }

    // ── Closers ──────────────────────────────────────────────────────────────

    fn close_leaf(&mut self) {
        match self.leaf.take() {
            Some(Leaf::Paragraph) => {
                self.scanner.finish(&mut self.out);
                self.scanner = InlineScanner::default();
                self.out.push(MdEvent::BlockEnd(Block::Paragraph));
            }
            Some(Leaf::Quote) => {
                self.scanner.finish(&mut self.out);
                self.scanner = InlineScanner::default();
                self.out.push(MdEvent::BlockEnd(Block::BlockQuote));
            }
            Some(Leaf::Heading(level)) => {
                self.scanner.finish(&mut self.out);
                self.scanner = InlineScanner::default();
                self.out.push(MdEvent::BlockEnd(Block::Heading { level }));
            }
            Some(Leaf::Item) => {
                self.scanner.finish(&mut self.out);
                self.scanner = InlineScanner::default();
                self.out.push(MdEvent::BlockEnd(Block::Item { task: None }));
            }
            Some(Leaf::Code { .. }) => {
                self.out.push(MdEvent::BlockEnd(Block::CodeBlock { lang: String::new() }));
            }
            None => {}
        }
        self.pending_break = false;
    }

    fn close_lists(&mut self) {
        while self.list_stack.pop().is_some() {
            self.out.push(MdEvent::BlockEnd(Block::List { start: None }));
        }
    }

    fn close_table(&mut self) {
        if let Some(header) = self.table.pending_header.take() {
            // Never confirmed by a delimiter row: plain paragraph text.
            self.paragraph_feed(&header);
            self.end_inline_line();
        }
        if self.table.started {
            let aligns = std::mem::take(&mut self.table.aligns);
            self.out.push(MdEvent::TableEnd { aligns });
            self.table.started = false;
        }
    }

    // ── Tables ───────────────────────────────────────────────────────────────

    fn table_line(&mut self, line: String) {
        if self.table.started {
            self.emit_table_row(&line);
            return;
        }
        match self.table.pending_header.take() {
            None => {
                self.table.pending_header = Some(line);
            }
            Some(header) => {
                if let Some(aligns) = parse_delimiter_row(&line) {
                    self.table.started = true;
                    self.table.aligns = aligns;
                    self.out.push(MdEvent::BlockStart(Block::Table));
                    self.out.push(MdEvent::BlockStart(Block::TableHead));
                    self.emit_table_row(&header);
                    self.out.push(MdEvent::BlockEnd(Block::TableHead));
                } else {
                    // Not a table: both lines were paragraph text.
                    self.paragraph_feed(&header);
                    self.out.push(MdEvent::SoftBreak);
                    for c in line.chars() {
                        self.scanner.push_char(c, &mut self.out);
                    }
                    self.end_inline_line();
                }
            }
        }
    }

    fn emit_table_row(&mut self, line: &str) {
        self.out.push(MdEvent::BlockStart(Block::TableRow));
        for cell in split_cells(line) {
            self.out.push(MdEvent::BlockStart(Block::TableCell));
            scan_inline(&cell, &mut self.out);
            self.out.push(MdEvent::BlockEnd(Block::TableCell));
        }
        self.out.push(MdEvent::BlockEnd(Block::TableRow));
    }
}

/// `---` / `***` / `___` with three or more identical markers.
fn is_thematic_break(line: &str) -> bool {
    let mut chars = line.chars();
    let Some(first) = chars.next() else { return false };
    if !matches!(first, '-' | '*' | '_') {
        return false;
    }
    line.len() >= 3 && line.chars().all(|c| c == first)
}

/// Split a table row into trimmed cell strings, honouring `\|` escapes.
fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('|').unwrap_or(trimmed);
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in trimmed.chars() {
        if escaped {
            if c != '|' {
                current.push('\\');
            }
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '|' {
            cells.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    cells.push(current.trim().to_string());
    cells
}

/// Parse `| :--- | :---: | ---: |` into alignments; `None` when the line is
/// not a delimiter row.
fn parse_delimiter_row(line: &str) -> Option<Vec<Align>> {
    let cells = split_cells(line);
    if cells.is_empty() {
        return None;
    }
    let mut aligns = Vec::with_capacity(cells.len());
    for cell in &cells {
        let cell = cell.trim();
        if cell.is_empty() {
            return None;
        }
        let left = cell.starts_with(':');
        let right = cell.ends_with(':');
        let dashes = cell.trim_start_matches(':').trim_end_matches(':');
        if dashes.is_empty() || !dashes.chars().all(|c| c == '-') {
            return None;
        }
        aligns.push(match (left, right) {
            (true, true) => Align::Center,
            (false, true) => Align::Right,
            _ => Align::Left,
        });
    }
    Some(aligns)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
