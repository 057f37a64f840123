//! Scoped, atomic batch of console writes

use std::io;
use std::sync::atomic::Ordering;
use std::sync::MutexGuard;

use crossterm::cursor::MoveUp;
use crossterm::style::ResetColor;
use crossterm::terminal::{Clear, ClearType};
use tracing::warn;

use super::{Console, ConsoleState, PendingView, Source, Stream};
use crate::term::ansi::{self, push_cmd};
use crate::term::cursor;

/// Holds the console lock until dropped.
///
/// On creation an ordinary-output batch erases the live prompt (once); on
/// drop it terminates its output with a newline and draws the prompt again.
/// A console-source batch leaves the screen as the caller built it.
pub struct ConsoleWriter<'a> {
    console: &'a Console,
    /// `None` for a batch nested inside one the thread already holds
    guard: Option<MutexGuard<'a, ConsoleState>>,
    stream: Stream,
    source: Source,
    /// Bytes not yet handed to the terminal, and the stream they belong to
    out: String,
    out_stream: Stream,
    wrote: bool,
    at_line_start: bool,
    /// Stream whose prompt was erased, and what to draw back
    redraw: Option<(Stream, PendingView)>,
    cols: u16,
    rows: u16,
    error: Option<io::Error>,
}

impl<'a> ConsoleWriter<'a> {
    pub(super) fn begin(
        console: &'a Console,
        guard: MutexGuard<'a, ConsoleState>,
        stream: Stream,
        source: Source,
    ) -> Self {
        let (cols, rows) = guard.terminal.size();
        let mut writer = Self {
            console,
            guard: Some(guard),
            stream,
            source,
            out: String::new(),
            out_stream: stream,
            wrote: false,
            at_line_start: true,
            redraw: None,
            cols,
            rows,
            error: None,
        };
        if source == Source::Output {
            writer.hide_prompt();
        }
        writer
    }

    pub(super) fn nested(console: &'a Console, stream: Stream) -> Self {
        Self {
            console,
            guard: None,
            stream,
            source: Source::Output,
            out: String::new(),
            out_stream: stream,
            wrote: false,
            at_line_start: true,
            redraw: None,
            cols: 80,
            rows: 24,
            error: None,
        }
    }

    /// Erase the console text of whichever stream shows it (the terminal is
    /// shared, so output on stderr has to move a prompt drawn on stdout).
    fn hide_prompt(&mut self) {
        let Some(state) = self.guard.as_deref() else {
            return;
        };
        let host = [self.stream, self.stream.other()]
            .into_iter()
            .find(|&s| state.stream(s).last == Source::Console);
        let Some(host) = host else {
            return;
        };
        let view = self.console.pending_view(state, host);
        if view.cells == 0 {
            return;
        }
        self.target(host);
        self.erase_at(view.cells, view.cursor);
        self.redraw = Some((host, view));
    }

    /// Terminal width in columns at the start of the batch
    pub fn cols(&self) -> u16 {
        self.cols
    }

    fn colors(&self) -> bool {
        self.console.colors_enabled()
    }

    fn format(&self, text: &str) -> String {
        if self.colors() {
            text.to_string()
        } else {
            ansi::strip_colors(text)
        }
    }

    /// Buffer subsequent bytes for `stream`, sending what was buffered for
    /// another stream first
    fn target(&mut self, stream: Stream) {
        if self.out_stream != stream {
            self.send();
            self.out_stream = stream;
        }
    }

    /// Hand the buffered bytes to the terminal
    fn send(&mut self) {
        if self.out.is_empty() {
            return;
        }
        let Some(state) = self.guard.as_deref_mut() else {
            // nested batches keep everything for the deferred queue
            return;
        };
        let bytes = std::mem::take(&mut self.out);
        if let Err(e) = state.terminal.write(self.out_stream, bytes.as_bytes()) {
            if self.error.is_none() {
                self.error = Some(e);
            }
        }
    }

    /// Write text on the batch's stream
    pub fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let stream = self.stream;
        self.target(stream);
        let formatted = self.format(text);
        self.out.push_str(&formatted);
        self.wrote = true;
        self.at_line_start = text.ends_with('\n');

        if self.source == Source::Console {
            if let Some(state) = self.guard.as_deref_mut() {
                let pending = &mut state.stream_mut(stream).pending;
                match text.rfind('\n') {
                    Some(idx) => {
                        pending.clear();
                        let tail = ansi::strip_escapes(&text[idx + 1..]);
                        if !tail.is_empty() {
                            pending.push(tail);
                        }
                    }
                    None => {
                        let stripped = ansi::strip_escapes(text);
                        if !stripped.is_empty() {
                            pending.push(stripped);
                        }
                    }
                }
            }
        }
    }

    /// Write text and make sure it ends with a newline
    pub fn write_line(&mut self, text: &str) {
        self.write(text);
        let trimmed = text.trim_end_matches(|c| c == ' ' || c == '\t' || c == '\x08');
        if !trimmed.ends_with('\n') {
            self.write("\n");
        }
    }

    /// Reset SGR attributes; nothing is written while colors are off
    pub fn reset_color(&mut self) {
        if !self.colors() {
            return;
        }
        let stream = self.stream;
        self.target(stream);
        push_cmd(&mut self.out, ResetColor);
    }

    /// Move left `n` cells from `offset`; returns the new offset
    pub fn move_left(&mut self, n: usize, offset: usize) -> usize {
        let stream = self.stream;
        self.target(stream);
        cursor::move_left_relative(&mut self.out, n, offset, self.cols)
    }

    /// Move right `n` cells from `offset`; returns the new offset
    pub fn move_right(&mut self, n: usize, offset: usize) -> usize {
        let stream = self.stream;
        self.target(stream);
        cursor::move_right_relative(&mut self.out, n, offset, self.cols)
    }

    /// Force the wrap when output ended exactly on a row boundary
    pub fn settle(&mut self, offset: usize) {
        let stream = self.stream;
        self.target(stream);
        cursor::settle_wrap(&mut self.out, offset, self.cols);
    }

    /// Blank the current row and return to its first column
    pub fn clear_line(&mut self) {
        let stream = self.stream;
        self.target(stream);
        self.out.push('\r');
        push_cmd(&mut self.out, Clear(ClearType::CurrentLine));
    }

    /// Erase console text of `cells` cells with the cursor at `cursor`,
    /// leaving the cursor at the start of its first row.
    pub fn erase_console(&mut self, cells: usize, cursor: usize) {
        let stream = self.stream;
        self.target(stream);
        self.erase_at(cells, cursor);
    }

    fn erase_at(&mut self, cells: usize, cursor: usize) {
        if cells == 0 && cursor == 0 {
            return;
        }
        let cols = self.cols.max(1) as usize;
        let end = cells.max(cursor);
        cursor::move_right_relative(&mut self.out, end - cursor, cursor, self.cols);
        // rows scrolled off the top cannot be reached any more
        let rows = (end / cols + 1).min(self.rows.max(1) as usize);
        for row in 0..rows {
            self.out.push('\r');
            push_cmd(&mut self.out, Clear(ClearType::CurrentLine));
            if row + 1 < rows {
                push_cmd(&mut self.out, MoveUp(1));
            }
        }
        if self.colors() {
            push_cmd(&mut self.out, ResetColor);
        }
        let target = self.out_stream;
        if let Some(state) = self.guard.as_deref_mut() {
            state.stream_mut(target).pending.clear();
        }
    }

    /// Replace the pending bookkeeping with what is now rendered
    pub fn record_pending(&mut self, rendered: &str) {
        let stream = self.stream;
        if let Some(state) = self.guard.as_deref_mut() {
            let pending = &mut state.stream_mut(stream).pending;
            pending.clear();
            let text = ansi::strip_escapes(rendered);
            if !text.is_empty() {
                pending.push(text);
            }
        }
    }

    fn finish(&mut self) {
        if self.guard.is_none() {
            return;
        }
        match self.source {
            Source::Console => {
                self.send();
                if let Some(state) = self.guard.as_deref_mut() {
                    state.stream_mut(self.stream).last = Source::Console;
                }
            }
            Source::Output => {
                if self.wrote && !self.at_line_start {
                    self.write("\n");
                }
                match self.redraw.take() {
                    Some((host, view)) => {
                        self.target(host);
                        let text = self.format(&view.text);
                        self.out.push_str(&text);
                        cursor::settle_wrap(&mut self.out, view.cells, self.cols);
                        cursor::move_left_relative(
                            &mut self.out,
                            view.cells - view.cursor,
                            view.cells,
                            self.cols,
                        );
                        self.send();
                        if let Some(state) = self.guard.as_deref_mut() {
                            if host != self.stream {
                                let own = state.stream_mut(self.stream);
                                own.pending.clear();
                                own.last = Source::Output;
                            }
                            let shown = state.stream_mut(host);
                            shown.pending = vec![ansi::strip_escapes(&view.text)];
                            shown.last = Source::Console;
                        }
                    }
                    None => {
                        self.send();
                        if let Some(state) = self.guard.as_deref_mut() {
                            let own = state.stream_mut(self.stream);
                            own.pending.clear();
                            own.last = Source::Output;
                        }
                    }
                }
            }
        }
    }
}

impl io::Write for ConsoleWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ConsoleWriter::write(self, &String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send();
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for ConsoleWriter<'_> {
    fn drop(&mut self) {
        if self.guard.is_none() {
            // nested: queue as one ordinary line once the outer batch ends
            let text = std::mem::take(&mut self.out);
            if !text.is_empty() {
                self.console.lock_deferred().push((self.stream, text));
            }
            return;
        }

        self.finish();
        drop(self.guard.take());
        self.console.release_held();

        if let Some(e) = self.error.take() {
            if !self.console.inner.write_failed.swap(true, Ordering::SeqCst) {
                warn!("terminal write failed, output dropped: {}", e);
            }
        }
        self.console.replay_deferred();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::CaptureTerminal;
    use crate::term::screen::Screen;

    #[test]
    fn test_erase_wrapped_console_text() {
        let term = CaptureTerminal::new(10, 24);
        let console = Console::new(term.clone());
        console.write_console(Stream::Stdout, "0123456789abcde");
        let before = term.stdout();
        term.clear();

        {
            let mut w = console.batch(Stream::Stdout, Source::Console);
            w.move_left(5, 15);
            w.erase_console(15, 10);
        }
        let mut screen = Screen::new(10);
        screen.feed(&before);
        screen.feed(&term.stdout());
        assert!(screen.lines().is_empty());
        assert_eq!(screen.cursor(), (0, 0));
        assert_eq!(console.pending(Stream::Stdout), "");
    }

    #[test]
    fn test_redraw_restores_cursor_offset() {
        use crate::console::{PromptSnapshot, SharedPrompt};
        use std::sync::Arc;

        let term = CaptureTerminal::new(10, 24);
        let prompt = Arc::new(SharedPrompt::new());
        let console = Console::with_prompt_source(term.clone(), prompt.clone());
        {
            let mut w = console.batch(Stream::Stdout, Source::Console);
            w.write("> abcdefghij");
            w.settle(12);
            w.move_left(7, 12);
            prompt.publish(PromptSnapshot {
                prompt: "> ".to_string(),
                input: "abcdefghij".to_string(),
                cursor_offset: 5,
            });
        }
        console.write_line(Stream::Stdout, "news");

        let mut screen = Screen::new(10);
        screen.feed(&term.stdout());
        assert_eq!(screen.lines(), vec!["news", "> abcdefgh", "ij"]);
        assert_eq!(screen.cursor(), (1, 5));
    }

    #[test]
    fn test_write_line_respects_existing_newline() {
        let term = CaptureTerminal::new(80, 24);
        let console = Console::new(term.clone());
        {
            let mut w = console.batch(Stream::Stderr, Source::Output);
            w.write_line("one\n ");
            w.write_line("two");
        }
        assert_eq!(term.stderr(), "one\n two\n");
    }

    #[test]
    fn test_reset_color_follows_color_switch() {
        let term = CaptureTerminal::new(80, 24);
        let console = Console::new(term.clone());
        console.set_colors_enabled(false);
        {
            let mut w = console.batch(Stream::Stdout, Source::Console);
            w.reset_color();
            w.write("plain");
        }
        assert!(term.stdout().contains("plain"));
        assert!(!term.stdout().contains('\x1b'));

        term.clear();
        console.set_colors_enabled(true);
        {
            let mut w = console.batch(Stream::Stdout, Source::Console);
            w.reset_color();
        }
        assert!(term.stdout().contains("\x1b[0m"));
    }
}
