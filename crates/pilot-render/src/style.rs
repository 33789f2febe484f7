// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! SGR style composition and OSC 66 text sizing.
//!
//! Styles layer on an inline stack: attributes and colors inherit from the
//! base layer unless overridden.  Text-sizing metadata (`ts`) does NOT
//! cascade — each layer either sets or clears it.

use crossterm::style::Color;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Kitty text-sizing scale as a rational `num/den`.
///
/// `den <= 1` is an integer scale and produces a single OSC 66 per style
/// run; fractional scales chunk the run (see [`emit_sized`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSize {
    pub num: u8,
    pub den: u8,
}

impl TextSize {
    pub fn integer(scale: u8) -> Self {
        Self { num: scale, den: 1 }
    }

    pub fn is_integer(&self) -> bool {
        self.den <= 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Style {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub strike: bool,
    pub dim: bool,
    pub fg: Option<Color>,
    /// Text-sizing metadata; never inherited across layers.
    pub ts: Option<TextSize>,
}

impl Style {
    pub fn bold() -> Self {
        Self { bold: true, ..Self::default() }
    }

    pub fn fg(color: Color) -> Self {
        Self { fg: Some(color), ..Self::default() }
    }

    /// Compose `layer` over `self`.  Booleans and colors inherit; `ts` comes
    /// only from the layer.
    pub fn merge(&self, layer: &Style) -> Style {
        Style {
            bold: self.bold || layer.bold,
            italic: self.italic || layer.italic,
            underline: self.underline || layer.underline,
            strike: self.strike || layer.strike,
            dim: self.dim || layer.dim,
            fg: layer.fg.or(self.fg),
            ts: layer.ts,
        }
    }

    pub fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    /// SGR introducer for this style; empty when plain.
    pub fn sgr(&self) -> String {
        if self.is_plain() {
            return String::new();
        }
        let mut codes: Vec<String> = Vec::new();
        if self.bold {
            codes.push("1".into());
        }
        if self.dim {
            codes.push("2".into());
        }
        if self.italic {
            codes.push("3".into());
        }
        if self.underline {
            codes.push("4".into());
        }
        if self.strike {
            codes.push("9".into());
        }
        if let Some(color) = self.fg {
            codes.push(fg_code(color));
        }
        format!("\x1b[{}m", codes.join(";"))
    }

    /// Wrap `text` in this style's SGR introducer and a reset.
    pub fn apply(&self, text: &str) -> String {
        if self.is_plain() {
            return text.to_string();
        }
        format!("{}{}\x1b[0m", self.sgr(), text)
    }
}

fn fg_code(color: Color) -> String {
    match color {
        Color::Black => "30".into(),
        Color::DarkRed => "31".into(),
        Color::DarkGreen => "32".into(),
        Color::DarkYellow => "33".into(),
        Color::DarkBlue => "34".into(),
        Color::DarkMagenta => "35".into(),
        Color::DarkCyan => "36".into(),
        Color::Grey => "37".into(),
        Color::DarkGrey => "90".into(),
        Color::Red => "91".into(),
        Color::Green => "92".into(),
        Color::Yellow => "93".into(),
        Color::Blue => "94".into(),
        Color::Magenta => "95".into(),
        Color::Cyan => "96".into(),
        Color::White => "97".into(),
        Color::AnsiValue(n) => format!("38;5;{n}"),
        Color::Rgb { r, g, b } => format!("38;2;{r};{g};{b}"),
        _ => "39".into(),
    }
}

// ─── OSC 66 text sizing ───────────────────────────────────────────────────────

/// Emit `text` wrapped in OSC 66 sizing sequences for scale `ts`.
///
/// Integer scales yield one sequence for the whole run.  Fractional scales
/// chunk at `floor(avail_width · den / num)` display columns; each chunk
/// carries a cell width of `ceil(chunk_width · num / den)` capped at 7.
pub fn emit_sized(text: &str, style: &Style, ts: TextSize, avail_width: usize) -> String {
    let mut out = String::new();
    let sgr = style.sgr();
    if ts.is_integer() {
        out.push_str(&sgr);
        out.push_str(&format!("\x1b]66;s={};{}\x1b\\", ts.num, text));
        if !sgr.is_empty() {
            out.push_str("\x1b[0m");
        }
        return out;
    }

    let chunk_cols = (avail_width * ts.den as usize / ts.num as usize).max(1);
    out.push_str(&sgr);
    for chunk in chunk_by_width(text, chunk_cols) {
        let chunk_width = UnicodeWidthStr::width(chunk.as_str());
        let cells = (chunk_width * ts.num as usize).div_ceil(ts.den as usize).min(7);
        out.push_str(&format!(
            "\x1b]66;n={}:d={}:w={};{}\x1b\\",
            ts.num, ts.den, cells, chunk
        ));
    }
    if !sgr.is_empty() {
        out.push_str("\x1b[0m");
    }
    out
}

/// Split `text` into pieces of at most `max_cols` display columns, never
/// splitting a character.
fn chunk_by_width(text: &str, max_cols: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut width = 0usize;
    for c in text.chars() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + w > max_cols && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            width = 0;
        }
        current.push(c);
        width += w;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Display width of `s`, skipping ANSI escape sequences (CSI and OSC).
pub fn visible_width(s: &str) -> usize {
    let mut width = 0usize;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            match chars.peek() {
                Some('[') => {
                    // CSI: consume until a final byte in @..~
                    chars.next();
                    for f in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&f) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    // OSC: consume until BEL or ST (ESC \).  OSC 66 carries
                    // displayed text after its metadata; everything else is
                    // invisible.
                    chars.next();
                    let mut body = String::new();
                    let mut prev_esc = false;
                    for f in chars.by_ref() {
                        if f == '\x07' || (prev_esc && f == '\\') {
                            break;
                        }
                        prev_esc = f == '\x1b';
                        if !prev_esc {
                            body.push(f);
                        }
                    }
                    if let Some(rest) = body.strip_prefix("66;") {
                        if let Some((_meta, payload)) = rest.split_once(';') {
                            width += UnicodeWidthStr::width(payload);
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        width += UnicodeWidthChar::width(c).unwrap_or(0);
    }
    width
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Style merge ───────────────────────────────────────────────────────────

    #[test]
    fn merge_inherits_attributes_from_base() {
        let base = Style { bold: true, fg: Some(Color::Cyan), ..Style::default() };
        let layer = Style { italic: true, ..Style::default() };
        let merged = base.merge(&layer);
        assert!(merged.bold && merged.italic);
        assert_eq!(merged.fg, Some(Color::Cyan));
    }

    #[test]
    fn merge_layer_color_wins() {
        let base = Style::fg(Color::Cyan);
        let layer = Style::fg(Color::Yellow);
        assert_eq!(base.merge(&layer).fg, Some(Color::Yellow));
    }

    #[test]
    fn ts_does_not_cascade_through_merge() {
        let base = Style { ts: Some(TextSize::integer(2)), ..Style::default() };
        let layer = Style::bold();
        let merged = base.merge(&layer);
        assert_eq!(merged.ts, None, "layer without ts clears it");

        let sized_layer = Style { ts: Some(TextSize { num: 3, den: 2 }), ..Style::default() };
        assert_eq!(base.merge(&sized_layer).ts, Some(TextSize { num: 3, den: 2 }));
    }

    // ── SGR ───────────────────────────────────────────────────────────────────

    #[test]
    fn plain_style_emits_nothing() {
        assert_eq!(Style::default().sgr(), "");
        assert_eq!(Style::default().apply("x"), "x");
    }

    #[test]
    fn bold_cyan_sgr_codes() {
        let s = Style { bold: true, fg: Some(Color::Cyan), ..Style::default() };
        assert_eq!(s.sgr(), "\x1b[1;96m");
        assert_eq!(s.apply("hi"), "\x1b[1;96mhi\x1b[0m");
    }

    #[test]
    fn strike_and_dim_codes() {
        let s = Style { strike: true, dim: true, ..Style::default() };
        assert_eq!(s.sgr(), "\x1b[2;9m");
    }

    // ── OSC 66 ────────────────────────────────────────────────────────────────

    #[test]
    fn integer_scale_is_one_sequence() {
        let out = emit_sized("Title", &Style::default(), TextSize::integer(2), 80);
        assert_eq!(out, "\x1b]66;s=2;Title\x1b\\");
    }

    #[test]
    fn fractional_scale_chunks_at_width_boundary() {
        // num=3, den=2, width=10 → chunk at floor(10*2/3) = 6 columns.
        let out = emit_sized("abcdefgh", &Style::default(), TextSize { num: 3, den: 2 }, 10);
        // Chunks: "abcdef" (6 cols → ceil(6*3/2)=9 → capped 7) and "gh"
        // (2 cols → ceil(2*3/2)=3).
        assert_eq!(
            out,
            "\x1b]66;n=3:d=2:w=7;abcdef\x1b\\\x1b]66;n=3:d=2:w=3;gh\x1b\\"
        );
    }

    #[test]
    fn fractional_cell_width_is_capped_at_seven() {
        let out = emit_sized("aaaaaaaaaa", &Style::default(), TextSize { num: 5, den: 2 }, 20);
        for part in out.split("w=").skip(1) {
            let w: usize = part[..part.find(';').unwrap()].parse().unwrap();
            assert!(w <= 7, "cell width must be capped: {out}");
        }
    }

    #[test]
    fn sized_run_keeps_surrounding_style() {
        let out = emit_sized("H", &Style::bold(), TextSize::integer(2), 80);
        assert!(out.starts_with("\x1b[1m"));
        assert!(out.ends_with("\x1b[0m"));
    }

    // ── chunk_by_width ────────────────────────────────────────────────────────

    #[test]
    fn chunking_never_splits_wide_chars() {
        let chunks = chunk_by_width("你你你", 3);
        // Each '你' is 2 columns; 3-col budget fits one per chunk... first
        // chunk takes one (2 cols), second char would exceed → new chunk.
        assert_eq!(chunks, vec!["你", "你", "你"]);
    }

    #[test]
    fn chunking_empty_is_empty() {
        assert!(chunk_by_width("", 5).is_empty());
    }

    // ── visible_width ─────────────────────────────────────────────────────────

    #[test]
    fn visible_width_ignores_sgr() {
        assert_eq!(visible_width("\x1b[1;96mhi\x1b[0m"), 2);
    }

    #[test]
    fn visible_width_ignores_osc() {
        assert_eq!(visible_width("\x1b]66;s=2;AB\x1b\\"), 2);
    }

    #[test]
    fn visible_width_counts_wide_chars() {
        assert_eq!(visible_width("a你b"), 4);
    }

    #[test]
    fn visible_width_plain_ascii() {
        assert_eq!(visible_width("hello"), 5);
    }
}
