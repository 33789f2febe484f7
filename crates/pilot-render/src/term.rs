// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Terminal primitives: cursor movement, raw/sane mode, synchronized output
//! and the process-wide cancellation flag.
//!
//! The terminal is a process-wide singleton; only one producer (the current
//! turn) writes at a time, so no locking is needed.  All writes route
//! through [`Term`] so tests can capture the byte stream.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossterm::cursor::{MoveToColumn, MoveUp};
use crossterm::queue;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, size, BeginSynchronizedUpdate, Clear, ClearType,
    EndSynchronizedUpdate,
};
use tracing::debug;

pub struct Term<W: Write> {
    out: W,
    /// Raw-mode tracking so drop can restore sane mode.
    raw: bool,
}

impl Term<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> Term<W> {
    pub fn new(out: W) -> Self {
        Self { out, raw: false }
    }

    /// Columns of the attached terminal; 80 when no tty is present.
    pub fn width(&self) -> u16 {
        size().map(|(w, _)| w).unwrap_or(80)
    }

    pub fn write_str(&mut self, s: &str) {
        let _ = self.out.write_all(s.as_bytes());
    }

    pub fn newline(&mut self) {
        let _ = self.out.write_all(b"\n");
    }

    pub fn flush(&mut self) {
        let _ = self.out.flush();
    }

    /// Move the cursor up `n` rows and to column 0.
    pub fn cursor_up(&mut self, n: u16) {
        if n > 0 {
            let _ = queue!(self.out, MoveUp(n));
        }
        let _ = queue!(self.out, MoveToColumn(0));
    }

    /// Erase the current line without moving the cursor row.
    pub fn clear_line(&mut self) {
        let _ = queue!(self.out, Clear(ClearType::CurrentLine), MoveToColumn(0));
    }

    /// Move up `n` rows, erasing each one on the way.
    pub fn clear_lines_up(&mut self, n: u16) {
        let _ = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine));
        for _ in 0..n {
            let _ = queue!(self.out, MoveUp(1), Clear(ClearType::CurrentLine));
        }
    }

    /// Open a synchronized-output window.  The terminal buffers everything
    /// until [`Self::end_sync`] so repaints land atomically.  Never issue a
    /// blocking prompt between the two calls.
    pub fn begin_sync(&mut self) {
        let _ = queue!(self.out, BeginSynchronizedUpdate);
    }

    pub fn end_sync(&mut self) {
        let _ = queue!(self.out, EndSynchronizedUpdate);
        let _ = self.out.flush();
    }

    /// Switch the terminal to raw mode (byte-at-a-time input).
    pub fn raw_mode(&mut self) {
        if !self.raw && enable_raw_mode().is_ok() {
            self.raw = true;
        }
    }

    /// Restore sane line-buffered mode; approval prompts read whole lines.
    pub fn sane_mode(&mut self) {
        if self.raw {
            let _ = disable_raw_mode();
            self.raw = false;
        }
    }

    pub fn writer(&self) -> &W {
        &self.out
    }
}

impl<W: Write> Drop for Term<W> {
    fn drop(&mut self) {
        self.sane_mode();
        let _ = self.out.flush();
    }
}

// ─── Cancellation ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct CancelInner {
    armed: AtomicBool,
    cancelled: AtomicBool,
}

/// Process-wide cancellation flag set from the Ctrl-C handler.
///
/// The flag only latches while a guard from [`CancelFlag::install`] is live;
/// outside of a turn Ctrl-C falls through to the input loop.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<CancelInner>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the flag for one turn.  Dropping the guard disarms and clears it.
    pub fn install(&self) -> CancelGuard {
        self.0.cancelled.store(false, Ordering::SeqCst);
        self.0.armed.store(true, Ordering::SeqCst);
        CancelGuard { flag: self.clone() }
    }

    /// Signal delivery entry point: latches only while armed.
    pub fn trigger(&self) {
        if self.0.armed.load(Ordering::SeqCst) {
            debug!("cancel triggered");
            self.0.cancelled.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Predicate form handed to the transport.
    pub fn checker(&self) -> Arc<dyn Fn() -> bool + Send + Sync> {
        let flag = self.clone();
        Arc::new(move || flag.is_cancelled())
    }

    /// Spawn the Ctrl-C listener task for the process lifetime.
    pub fn spawn_ctrlc_listener(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                flag.trigger();
            }
        });
    }
}

pub struct CancelGuard {
    flag: CancelFlag,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.flag.0.armed.store(false, Ordering::SeqCst);
        self.flag.0.cancelled.store(false, Ordering::SeqCst);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(f: impl FnOnce(&mut Term<Vec<u8>>)) -> String {
        let mut term = Term::new(Vec::new());
        f(&mut term);
        term.flush();
        String::from_utf8(term.writer().clone()).unwrap()
    }

    #[test]
    fn cursor_up_emits_cuu_and_column_reset() {
        let out = captured(|t| t.cursor_up(3));
        assert!(out.contains("\x1b[3A"), "cursor up: {out:?}");
        assert!(out.contains("\x1b[1G"), "column reset: {out:?}");
    }

    #[test]
    fn cursor_up_zero_only_resets_column() {
        let out = captured(|t| t.cursor_up(0));
        assert!(!out.contains('A'));
    }

    #[test]
    fn sync_window_brackets_with_2026() {
        let out = captured(|t| {
            t.begin_sync();
            t.write_str("painted");
            t.end_sync();
        });
        let begin = out.find("\x1b[?2026h").expect("begin sync");
        let end = out.find("\x1b[?2026l").expect("end sync");
        let body = out.find("painted").unwrap();
        assert!(begin < body && body < end, "paint inside the window: {out:?}");
    }

    #[test]
    fn clear_lines_up_erases_each_row() {
        let out = captured(|t| t.clear_lines_up(2));
        assert_eq!(out.matches("\x1b[2K").count(), 3, "current + 2 rows: {out:?}");
        assert_eq!(out.matches("\x1b[1A").count(), 2);
    }

    #[test]
    fn cancel_flag_latches_only_while_armed() {
        let flag = CancelFlag::new();
        flag.trigger();
        assert!(!flag.is_cancelled(), "disarmed flag must not latch");

        let guard = flag.install();
        flag.trigger();
        assert!(flag.is_cancelled());
        drop(guard);
        assert!(!flag.is_cancelled(), "guard drop clears the flag");
    }

    #[test]
    fn checker_reflects_flag_state() {
        let flag = CancelFlag::new();
        let check = flag.checker();
        let _guard = flag.install();
        assert!(!check());
        flag.trigger();
        assert!(check());
    }
}
