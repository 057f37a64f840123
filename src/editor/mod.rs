//! Interactive line editor
//!
//! [`LineEditor`] owns one input line at a time: the characters typed so
//! far, the cursor index, the edit mode and the command history. It runs on
//! its own thread, reads keystrokes from a [`KeyReader`] and draws through a
//! console batch, so background output can never land in the middle of a
//! redraw.
//!
//! After every change the editor publishes a [`PromptSnapshot`]; the console
//! uses it to put the prompt back (with the cursor in place) after another
//! thread printed a line.
//!
//! # Cursor model
//!
//! Positions on screen are offsets in cells from the first column of the
//! prompt's row: the prompt width plus the width of the input before the
//! cursor. Every operation ends with the physical cursor at
//! `offset_of(cursor)`, using relative moves that follow the terminal's
//! line wrapping.

mod action;
mod clipboard;
mod history;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::KeyEvent;
use crossterm::style::{Attribute, SetAttribute, SetBackgroundColor, SetForegroundColor};
use tracing::{debug, info};

use crate::client::Collaborator;
use crate::config::Config;
use crate::console::{Console, ConsoleWriter, PromptSnapshot, SharedPrompt, Source, Stream};
use crate::term::ansi::{self, push_cmd, NamedColor, Paint};
use crate::term::cursor;
use crate::term::input::{KeyRead, KeyReader};

pub use action::EditAction;
pub use clipboard::{ClipboardSource, SystemClipboard};
pub use history::{CommandHistory, HISTORY_LIMIT};

/// Lines that end the session instead of being sent
const QUIT_COMMANDS: [&str; 4] = ["\\q", "!q", "\\quit", "!quit"];

const INTERRUPT_NOTICE: &str = "Got keyboard interrupt, exiting (do not press interrupt again)...";

/// Editor settings
#[derive(Debug, Clone)]
pub struct EditorOptions {
    pub prompt_label: String,
    /// History cap (0 = unbounded)
    pub max_history: usize,
    pub motd_timeout: Duration,
    pub response_timeout: Duration,
    /// Ask the terminal for the cursor position before the first prompt
    pub probe_cursor: bool,
    pub query_timeout: Duration,
}

impl EditorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prompt_label: config.prompt.label.clone(),
            max_history: config.history.max_lines,
            motd_timeout: secs(config.timeouts.motd_secs),
            response_timeout: secs(config.timeouts.response_secs),
            probe_cursor: config.prompt.probe_cursor,
            query_timeout: Duration::from_millis(config.timeouts.cursor_query_ms),
        }
    }
}

/// Whether typed characters push the rest of the line right or replace it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EditMode {
    #[default]
    Insert,
    Overwrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditorState {
    Editing,
    Submitted,
    Stopped,
}

/// Result of one keystroke
#[derive(Debug, PartialEq, Eq)]
pub enum KeyOutcome {
    Continue,
    Submitted(String),
}

/// Result of reading one line
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Line(String),
    Interrupted,
    Closed,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("interrupted from the keyboard")]
    Interrupted,
}

pub struct LineEditor {
    console: Console,
    prompt: Arc<SharedPrompt>,
    input: KeyReader,
    clipboard: Box<dyn ClipboardSource>,
    options: EditorOptions,

    buffer: Vec<char>,
    cursor: usize,
    mode: EditMode,
    history: CommandHistory,
    /// Index of the entry shown; `history.len()` while editing the live line
    history_cursor: usize,
    /// Live line and cursor saved when history browsing started
    live: Option<(Vec<char>, usize)>,

    prompt_text: String,
    prompt_width: usize,
    cols: u16,
    state: EditorState,
    probed: bool,
}

/// Seconds from the config; negative or non-finite values mean zero
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn width_of(chars: &[char]) -> usize {
    chars.iter().map(|&c| ansi::char_width(c)).sum()
}

/// Start of the word before `i` (skipping whitespace first)
fn word_start_before(buf: &[char], i: usize) -> usize {
    let mut j = i.min(buf.len());
    while j > 0 && buf[j - 1].is_whitespace() {
        j -= 1;
    }
    while j > 0 && !buf[j - 1].is_whitespace() {
        j -= 1;
    }
    j
}

/// Start of the word after `i`, or the end of the line
fn word_start_after(buf: &[char], i: usize) -> usize {
    let mut j = i.min(buf.len());
    while j < buf.len() && !buf[j].is_whitespace() {
        j += 1;
    }
    while j < buf.len() && buf[j].is_whitespace() {
        j += 1;
    }
    j
}

pub fn is_quit_command(line: &str) -> bool {
    let line = line.trim();
    QUIT_COMMANDS.iter().any(|q| q.eq_ignore_ascii_case(line))
}

impl LineEditor {
    pub fn new(
        console: Console,
        prompt: Arc<SharedPrompt>,
        input: KeyReader,
        clipboard: Box<dyn ClipboardSource>,
        options: EditorOptions,
    ) -> Self {
        let history = CommandHistory::new(options.max_history);
        let mut editor = Self {
            console,
            prompt,
            input,
            clipboard,
            options,
            buffer: Vec::new(),
            cursor: 0,
            mode: EditMode::Insert,
            history,
            history_cursor: 0,
            live: None,
            prompt_text: String::new(),
            prompt_width: 0,
            cols: 80,
            state: EditorState::Editing,
            probed: false,
        };
        editor.render_prompt();
        editor
    }

    #[cfg(test)]
    pub fn state(&self) -> EditorState {
        self.state
    }

    fn offset_of(&self, index: usize) -> usize {
        self.prompt_width + width_of(&self.buffer[..index.min(self.buffer.len())])
    }

    fn end_offset(&self) -> usize {
        self.offset_of(self.buffer.len())
    }

    fn line(&self) -> String {
        self.buffer.iter().collect()
    }

    /// Rebuild the prompt for the current mode
    fn render_prompt(&mut self) {
        let mut s = String::new();
        push_cmd(&mut s, SetForegroundColor(NamedColor::White.to_crossterm()));
        push_cmd(&mut s, SetBackgroundColor(NamedColor::DarkGray.to_crossterm()));
        push_cmd(&mut s, SetAttribute(Attribute::Underlined));
        s.push_str(&self.options.prompt_label);
        push_cmd(&mut s, SetAttribute(Attribute::Reset));
        match self.mode {
            EditMode::Overwrite => {
                push_cmd(&mut s, SetForegroundColor(NamedColor::Yellow.to_crossterm()));
                push_cmd(&mut s, SetAttribute(Attribute::Underlined));
                s.push('*');
                push_cmd(&mut s, SetAttribute(Attribute::Reset));
            }
            EditMode::Insert => s.push(' '),
        }
        s.push_str(": ");
        self.prompt_width = ansi::visible_len(&s);
        self.prompt_text = s;
    }

    fn snapshot(&self) -> PromptSnapshot {
        PromptSnapshot {
            prompt: self.prompt_text.clone(),
            input: self.line(),
            cursor_offset: self.offset_of(self.cursor),
        }
    }

    /// Make the on-screen state visible to other writers
    fn publish(&self, w: &mut ConsoleWriter<'_>) {
        let snap = self.snapshot();
        w.record_pending(&snap.rendered());
        self.prompt.publish(snap);
    }

    /// Draw a fresh prompt for a new line
    pub fn begin_line(&mut self) {
        let console = self.console.clone();
        let mut w = console.batch(Stream::Stdout, Source::Console);
        self.cols = w.cols();

        if self.options.probe_cursor && !self.probed {
            self.probed = true;
            match cursor::query_cursor_position(&mut w, &mut self.input, self.options.query_timeout) {
                // something is already on this row: start below it
                Ok(Some(pos)) if pos.col > 1 => w.write("\n"),
                Ok(Some(_)) => {}
                Ok(None) => debug!("no cursor position report, assuming line start"),
                Err(e) => debug!("cursor position query failed: {}", e),
            }
        }

        self.buffer.clear();
        self.cursor = 0;
        self.history_cursor = self.history.len();
        self.live = None;
        self.state = EditorState::Editing;
        self.render_prompt();

        w.reset_color();
        w.clear_line();
        w.write(&self.prompt_text);
        w.settle(self.prompt_width);
        self.publish(&mut w);
    }

    /// Apply one keystroke
    pub fn handle_key(&mut self, key: &KeyEvent) -> KeyOutcome {
        if self.state != EditorState::Editing {
            return KeyOutcome::Continue;
        }
        let action = EditAction::from_key(key);
        if action == EditAction::Ignore {
            return KeyOutcome::Continue;
        }

        let console = self.console.clone();
        let mut w = console.batch(Stream::Stdout, Source::Console);
        self.cols = w.cols();

        match action {
            EditAction::Submit => return KeyOutcome::Submitted(self.submit(&mut w)),
            EditAction::HistoryPrev => self.history_prev(&mut w),
            EditAction::HistoryNext => self.history_next(&mut w),
            EditAction::Left => {
                if self.cursor > 0 {
                    self.move_cursor(&mut w, self.cursor - 1);
                }
            }
            EditAction::Right => {
                if self.cursor < self.buffer.len() {
                    self.move_cursor(&mut w, self.cursor + 1);
                }
            }
            EditAction::WordLeft => {
                let target = word_start_before(&self.buffer, self.cursor);
                self.move_cursor(&mut w, target);
            }
            EditAction::WordRight => {
                let target = word_start_after(&self.buffer, self.cursor);
                self.move_cursor(&mut w, target);
            }
            EditAction::Home => self.move_cursor(&mut w, 0),
            EditAction::End => self.move_cursor(&mut w, self.buffer.len()),
            EditAction::Backspace => self.backspace(&mut w),
            EditAction::Delete => self.delete(&mut w),
            EditAction::ToggleMode => {
                self.mode = match self.mode {
                    EditMode::Insert => EditMode::Overwrite,
                    EditMode::Overwrite => EditMode::Insert,
                };
                let buffer = self.buffer.clone();
                self.replace_line(&mut w, buffer, self.cursor);
            }
            EditAction::Paste => {
                let pasted = self.clipboard.text().map(|t| ansi::sanitize_input(&t));
                if let Some(text) = pasted {
                    let units: Vec<char> = text.chars().collect();
                    self.insert_units(&mut w, &units);
                }
            }
            EditAction::Insert(c) => self.insert_units(&mut w, &[c]),
            EditAction::Ignore => {}
        }

        self.publish(&mut w);
        KeyOutcome::Continue
    }

    fn submit(&mut self, w: &mut ConsoleWriter<'_>) -> String {
        let line = self.line();
        self.history.add(&line);

        let end = self.end_offset();
        let cur = self.offset_of(self.cursor);
        w.move_right(end - cur, cur);
        if end > 0 && end % self.cols.max(1) as usize == 0 {
            // already settled on a fresh row
            w.record_pending("");
        } else {
            w.write("\n");
        }

        self.buffer.clear();
        self.cursor = 0;
        self.live = None;
        self.history_cursor = self.history.len();
        self.state = EditorState::Submitted;
        self.prompt.hide();
        line.trim().to_string()
    }

    fn history_prev(&mut self, w: &mut ConsoleWriter<'_>) {
        if self.history.is_empty() || self.history_cursor == 0 {
            return;
        }
        if self.history_cursor >= self.history.len() {
            self.live = Some((self.buffer.clone(), self.cursor));
        }
        self.history_cursor = (self.history_cursor - 1).min(self.history.len() - 1);
        let entry: Vec<char> = self
            .history
            .get(self.history_cursor)
            .unwrap_or_default()
            .chars()
            .collect();
        let len = entry.len();
        self.replace_line(w, entry, len);
    }

    fn history_next(&mut self, w: &mut ConsoleWriter<'_>) {
        if self.history_cursor >= self.history.len() {
            return;
        }
        self.history_cursor += 1;
        if self.history_cursor == self.history.len() {
            let (buffer, cursor) = self.live.take().unwrap_or_default();
            self.replace_line(w, buffer, cursor);
        } else {
            let entry: Vec<char> = self
                .history
                .get(self.history_cursor)
                .unwrap_or_default()
                .chars()
                .collect();
            let len = entry.len();
            self.replace_line(w, entry, len);
        }
    }

    fn move_cursor(&mut self, w: &mut ConsoleWriter<'_>, target: usize) {
        let target = target.min(self.buffer.len());
        let from = self.offset_of(self.cursor);
        let to = self.offset_of(target);
        if to < from {
            w.move_left(from - to, from);
        } else if to > from {
            w.move_right(to - from, from);
        }
        self.cursor = target;
    }

    fn backspace(&mut self, w: &mut ConsoleWriter<'_>) {
        if self.cursor == 0 {
            return;
        }
        let old_end = self.end_offset();
        let at = self.cursor - 1;
        self.move_cursor(w, at);
        self.buffer.remove(at);
        self.redraw_tail(w, at, old_end, at);
    }

    fn delete(&mut self, w: &mut ConsoleWriter<'_>) {
        if self.cursor >= self.buffer.len() {
            return;
        }
        let old_end = self.end_offset();
        let at = self.cursor;
        self.buffer.remove(at);
        self.redraw_tail(w, at, old_end, at);
    }

    /// Type `units` at the cursor in the current mode
    fn insert_units(&mut self, w: &mut ConsoleWriter<'_>, units: &[char]) {
        if units.is_empty() {
            return;
        }
        let old_end = self.end_offset();
        let at = self.cursor;
        let replaced_end = match self.mode {
            EditMode::Insert => at,
            EditMode::Overwrite => (at + units.len()).min(self.buffer.len()),
        };
        self.buffer.splice(at..replaced_end, units.iter().copied());
        self.redraw_tail(w, at, old_end, at + units.len());
    }

    /// Rewrite the line from index `from` (where the cursor physically is),
    /// blank whatever the line lost, and park the cursor at `target`.
    fn redraw_tail(&mut self, w: &mut ConsoleWriter<'_>, from: usize, old_end: usize, target: usize) {
        let tail: String = self.buffer[from..].iter().collect();
        w.write(&tail);
        let new_end = self.end_offset();
        let mut end = new_end;
        if old_end > new_end {
            w.write(&" ".repeat(old_end - new_end));
            end = old_end;
        }
        w.settle(end);
        let target_offset = self.offset_of(target);
        w.move_left(end - target_offset, end);
        self.cursor = target;
    }

    /// Replace the whole line (prompt included) and put the cursor at
    /// `cursor`
    fn replace_line(&mut self, w: &mut ConsoleWriter<'_>, buffer: Vec<char>, cursor: usize) {
        let end = self.end_offset();
        let cur = self.offset_of(self.cursor);
        w.erase_console(end, cur);

        self.buffer = buffer;
        self.cursor = cursor.min(self.buffer.len());
        self.render_prompt();

        w.write(&self.prompt_text);
        w.write(&self.line());
        let new_end = self.end_offset();
        w.settle(new_end);
        let target = self.offset_of(self.cursor);
        w.move_left(new_end - target, new_end);
    }

    /// Remove the unfinished line from the screen and stop editing
    fn abandon_line(&mut self) {
        let console = self.console.clone();
        let mut w = console.batch(Stream::Stdout, Source::Console);
        let end = self.end_offset();
        let cur = self.offset_of(self.cursor);
        w.erase_console(end, cur);
        w.record_pending("");
        self.prompt.hide();
        self.buffer.clear();
        self.cursor = 0;
        self.state = EditorState::Stopped;
    }

    /// Read keystrokes until a line is submitted or the session ends
    pub fn read_line(&mut self, stop: &AtomicBool) -> ReadOutcome {
        if stop.load(Ordering::SeqCst) {
            self.state = EditorState::Stopped;
            return ReadOutcome::Cancelled;
        }
        self.begin_line();
        loop {
            match self.input.next_key(stop) {
                KeyRead::Key(key) => {
                    if let KeyOutcome::Submitted(line) = self.handle_key(&key) {
                        return ReadOutcome::Line(line);
                    }
                    if stop.load(Ordering::SeqCst) {
                        self.abandon_line();
                        return ReadOutcome::Cancelled;
                    }
                }
                KeyRead::Interrupted => return ReadOutcome::Interrupted,
                KeyRead::Closed => {
                    self.abandon_line();
                    return ReadOutcome::Closed;
                }
                KeyRead::Cancelled => {
                    self.abandon_line();
                    return ReadOutcome::Cancelled;
                }
            }
        }
    }

    /// Show the interrupt, stop the collaborator and end the session
    fn interrupt(&mut self, client: &dyn Collaborator) -> SessionError {
        let console = self.console.clone();
        {
            let mut w = console.batch(Stream::Stdout, Source::Console);
            let end = self.end_offset();
            let cur = self.offset_of(self.cursor);
            w.move_right(end - cur, cur);
        }
        self.state = EditorState::Stopped;
        self.prompt.hide();
        console.write_console(Stream::Stdout, "^C\n");
        console.write_line_with(Stream::Stderr, INTERRUPT_NOTICE, Paint::fg(NamedColor::BrightRed));
        client.shutdown();
        SessionError::Interrupted
    }

    /// Run the interactive session until quit, end of input or stop
    pub fn run(&mut self, client: &dyn Collaborator, stop: &AtomicBool) -> Result<(), SessionError> {
        if let Some(motd) = client.motd_handle() {
            if !motd.wait_timeout(self.options.motd_timeout) {
                debug!("no message of the day after {:?}", self.options.motd_timeout);
            }
        }
        if client.awaits_initial_response() {
            if let Some(response) = client.response_handle() {
                if !response.wait_timeout(self.options.response_timeout) {
                    debug!("no initial response after {:?}", self.options.response_timeout);
                }
            }
        }

        loop {
            match self.read_line(stop) {
                ReadOutcome::Line(line) => {
                    if line.is_empty() {
                        continue;
                    }
                    if is_quit_command(&line) {
                        info!("quit requested");
                        self.state = EditorState::Stopped;
                        client.shutdown();
                        return Ok(());
                    }
                    let response = client.response_handle();
                    if let Some(response) = &response {
                        response.clear();
                    }
                    client.on_line_submitted(&line);
                    if let Some(response) = response {
                        if !response.wait_timeout(self.options.response_timeout) {
                            debug!("no response to {:?} after {:?}", line, self.options.response_timeout);
                        }
                    }
                }
                ReadOutcome::Closed => {
                    info!("input closed");
                    client.shutdown();
                    return Ok(());
                }
                ReadOutcome::Cancelled => {
                    client.shutdown();
                    return Ok(());
                }
                ReadOutcome::Interrupted => return Err(self.interrupt(client)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::WaitHandle;
    use crate::console::{CaptureTerminal, PromptSource};
    use crate::term::screen::Screen;
    use crossterm::event::{KeyCode, KeyModifiers};
    use std::sync::mpsc::{self, Sender};
    use std::sync::Mutex;

    struct FixedClipboard(&'static str);

    impl ClipboardSource for FixedClipboard {
        fn text(&mut self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    struct Harness {
        term: CaptureTerminal,
        console: Console,
        prompt: Arc<SharedPrompt>,
        editor: LineEditor,
        tx: Sender<Vec<u8>>,
        cols: u16,
    }

    fn options() -> EditorOptions {
        EditorOptions {
            prompt_label: "p".to_string(),
            max_history: 10,
            motd_timeout: Duration::from_millis(50),
            response_timeout: Duration::from_millis(50),
            probe_cursor: false,
            query_timeout: Duration::from_millis(50),
        }
    }

    fn harness(cols: u16) -> Harness {
        let term = CaptureTerminal::new(cols, 50);
        let prompt = Arc::new(SharedPrompt::new());
        let console = Console::with_prompt_source(term.clone(), prompt.clone());
        let (tx, rx) = mpsc::channel();
        let editor = LineEditor::new(
            console.clone(),
            prompt.clone(),
            KeyReader::from_channel(rx),
            Box::new(FixedClipboard("pasted\ttext\x1b[31m!")),
            options(),
        );
        Harness { term, console, prompt, editor, tx, cols }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::CONTROL)
    }

    fn type_str(editor: &mut LineEditor, s: &str) {
        for c in s.chars() {
            editor.handle_key(&key(KeyCode::Char(c)));
        }
    }

    impl Harness {
        fn screen(&self) -> Screen {
            let mut screen = Screen::new(self.cols);
            screen.feed(&self.term.stdout());
            screen
        }

        /// Physical cursor matches the logical cursor, and the rows show the
        /// prompt followed by the buffer
        fn assert_consistent(&self, start_row: usize) {
            let screen = self.screen();
            let (row, col) = screen.cursor();
            let cols = self.cols as usize;
            assert!(row >= start_row);
            let physical = (row - start_row) * cols + col;
            assert_eq!(
                physical,
                self.editor.offset_of(self.editor.cursor),
                "buffer {:?} cursor {}",
                self.editor.line(),
                self.editor.cursor
            );

            let end = self.editor.end_offset();
            let rows = end / cols + 1;
            let shown: String = (start_row..start_row + rows)
                .map(|r| format!("{:<width$}", screen.line(r), width = cols))
                .collect();
            let expected = format!("p : {}", self.editor.line());
            assert_eq!(shown.trim_end(), expected.trim_end());
        }
    }

    #[test]
    fn test_basic_edit_inserts_at_cursor() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "hel");
        h.editor.handle_key(&key(KeyCode::Left));
        h.editor.handle_key(&key(KeyCode::Left));
        type_str(&mut h.editor, "X");
        assert_eq!(h.editor.line(), "hXel");
        assert_eq!(h.editor.cursor, 2);
        h.assert_consistent(0);
    }

    #[test]
    fn test_word_jump() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "foo bar baz");
        assert_eq!(h.editor.cursor, 11);
        h.editor.handle_key(&ctrl(KeyCode::Left));
        assert_eq!(h.editor.cursor, 8);
        h.editor.handle_key(&ctrl(KeyCode::Left));
        assert_eq!(h.editor.cursor, 4);
        h.editor.handle_key(&ctrl(KeyCode::Right));
        assert_eq!(h.editor.cursor, 8);
        h.editor.handle_key(&ctrl(KeyCode::Right));
        assert_eq!(h.editor.cursor, 11);
        h.assert_consistent(0);
    }

    #[test]
    fn test_overwrite_mode() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "abc");
        h.editor.handle_key(&key(KeyCode::Home));
        h.editor.handle_key(&key(KeyCode::Right));
        h.editor.handle_key(&key(KeyCode::Insert));
        assert_eq!(h.editor.mode, EditMode::Overwrite);
        assert!(h.prompt.snapshot().prompt.contains('*'));
        type_str(&mut h.editor, "X");
        assert_eq!(h.editor.line(), "aXc");
        assert_eq!(h.editor.cursor, 2);

        // overwriting past the end appends
        type_str(&mut h.editor, "YZ");
        assert_eq!(h.editor.line(), "aXYZ");
        assert_eq!(h.editor.cursor, 4);
        h.editor.handle_key(&key(KeyCode::Insert));
        assert_eq!(h.editor.mode, EditMode::Insert);
    }

    #[test]
    fn test_backspace_and_delete() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "abcd");
        h.editor.handle_key(&key(KeyCode::Left));
        h.editor.handle_key(&key(KeyCode::Backspace));
        assert_eq!(h.editor.line(), "abd");
        assert_eq!(h.editor.cursor, 2);
        h.editor.handle_key(&key(KeyCode::Delete));
        assert_eq!(h.editor.line(), "ab");
        assert_eq!(h.editor.cursor, 2);
        h.editor.handle_key(&key(KeyCode::Delete));
        h.editor.handle_key(&key(KeyCode::Home));
        h.editor.handle_key(&key(KeyCode::Backspace));
        assert_eq!(h.editor.line(), "ab");
        assert_eq!(h.editor.cursor, 0);
        h.assert_consistent(0);
    }

    #[test]
    fn test_paste_is_sanitized_and_atomic() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "[]");
        h.editor.handle_key(&key(KeyCode::Left));
        h.editor.handle_key(&ctrl(KeyCode::Char('v')));
        assert_eq!(h.editor.line(), "[pasted text!]");
        assert_eq!(h.editor.cursor, 13);
        h.assert_consistent(0);
    }

    #[test]
    fn test_reserved_keys_leave_state_alone() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "abc");
        let before = h.term.stdout();
        h.editor.handle_key(&key(KeyCode::Tab));
        h.editor.handle_key(&ctrl(KeyCode::Char('r')));
        h.editor.handle_key(&key(KeyCode::Esc));
        assert_eq!(h.editor.line(), "abc");
        assert_eq!(h.editor.cursor, 3);
        assert_eq!(h.term.stdout(), before);
    }

    #[test]
    fn test_history_round_trip() {
        let mut h = harness(80);
        for line in ["first", "second", "third"] {
            h.editor.begin_line();
            type_str(&mut h.editor, line);
            let outcome = h.editor.handle_key(&key(KeyCode::Enter));
            assert_eq!(outcome, KeyOutcome::Submitted(line.to_string()));
        }

        h.editor.begin_line();
        type_str(&mut h.editor, "draft");
        h.editor.handle_key(&key(KeyCode::Left));
        for k in 1..=3 {
            for _ in 0..k {
                h.editor.handle_key(&key(KeyCode::Up));
            }
            for _ in 0..k {
                h.editor.handle_key(&key(KeyCode::Down));
            }
            assert_eq!(h.editor.line(), "draft");
            assert_eq!(h.editor.cursor, 4);
        }

        h.editor.handle_key(&key(KeyCode::Up));
        assert_eq!(h.editor.line(), "third");
        h.editor.handle_key(&key(KeyCode::Up));
        h.editor.handle_key(&key(KeyCode::Up));
        assert_eq!(h.editor.line(), "first");
        // oldest entry: Up does nothing
        h.editor.handle_key(&key(KeyCode::Up));
        assert_eq!(h.editor.line(), "first");
        assert_eq!(h.editor.cursor, 5);

        // back on the live line: Down does nothing
        for _ in 0..4 {
            h.editor.handle_key(&key(KeyCode::Down));
        }
        assert_eq!(h.editor.line(), "draft");
        assert_eq!(h.editor.cursor, 4);
    }

    #[test]
    fn test_submit_hides_prompt_and_returns_trimmed() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "  hi  ");
        h.editor.handle_key(&key(KeyCode::Home));
        let outcome = h.editor.handle_key(&key(KeyCode::Enter));
        assert_eq!(outcome, KeyOutcome::Submitted("hi".to_string()));
        assert_eq!(h.editor.state(), EditorState::Submitted);
        assert!(h.prompt.snapshot().is_hidden());
        assert!(h.term.stdout().ends_with('\n'));

        // keys after submission are not processed
        type_str(&mut h.editor, "x");
        assert_eq!(h.editor.line(), "");
    }

    #[test]
    fn test_history_keeps_repeated_and_blank_lines() {
        let mut h = harness(80);
        h.editor.history = CommandHistory::new(3);
        for line in ["x", "x", "", "x", "x", "x"] {
            h.editor.begin_line();
            type_str(&mut h.editor, line);
            h.editor.handle_key(&key(KeyCode::Enter));
        }
        assert_eq!(h.editor.history.len(), 3);

        h.editor.begin_line();
        type_str(&mut h.editor, " y ");
        h.editor.handle_key(&key(KeyCode::Enter));
        h.editor.begin_line();
        h.editor.handle_key(&key(KeyCode::Up));
        assert_eq!(h.editor.line(), " y ");
        h.editor.handle_key(&key(KeyCode::Up));
        assert_eq!(h.editor.line(), "x");
    }

    #[test]
    fn test_prompt_without_colors_has_no_sgr() {
        let mut h = harness(80);
        h.console.set_colors_enabled(false);
        h.editor.begin_line();
        type_str(&mut h.editor, "a");
        h.console.write_line(Stream::Stdout, "event");
        let out = h.term.stdout();
        assert_eq!(ansi::strip_colors(&out), out);
        assert!(!out.contains("\x1b[0m"));
        h.assert_consistent(1);
    }

    #[test]
    fn test_concurrent_log_during_edit() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "he");
        h.term.clear();

        let console = h.console.clone();
        std::thread::spawn(move || console.write_line(Stream::Stdout, "event"))
            .join()
            .unwrap();

        let out = h.term.stdout();
        let erase = out.find("\x1b[2K").unwrap();
        let event = out.find("event\n").unwrap();
        let reprint = out.rfind("he").unwrap();
        assert!(erase < event && event < reprint);

        let mut screen = Screen::new(80);
        screen.feed("p : he");
        screen.feed(&out);
        assert_eq!(screen.lines(), vec!["event", "p : he"]);
        // prompt is four cells wide
        assert_eq!(screen.cursor(), (1, 6));
    }

    #[test]
    fn test_log_keeps_cursor_inside_input() {
        let mut h = harness(80);
        h.editor.begin_line();
        type_str(&mut h.editor, "hello");
        h.editor.handle_key(&key(KeyCode::Home));
        h.editor.handle_key(&key(KeyCode::Right));
        h.console.write_line(Stream::Stdout, "event");
        h.assert_consistent(1);
        type_str(&mut h.editor, "_");
        assert_eq!(h.editor.line(), "h_ello");
        h.assert_consistent(1);
    }

    #[test]
    fn test_cursor_invariant_across_wraps() {
        let mut h = harness(10);
        h.editor.begin_line();
        h.assert_consistent(0);

        let keys: Vec<KeyEvent> = "abcdefghijklmnopqrstuvw"
            .chars()
            .map(|c| key(KeyCode::Char(c)))
            .chain([
                key(KeyCode::Left),
                key(KeyCode::Left),
                key(KeyCode::Left),
                key(KeyCode::Char('1')),
                key(KeyCode::Backspace),
                key(KeyCode::Backspace),
                key(KeyCode::Home),
                key(KeyCode::Right),
                key(KeyCode::Char('2')),
                key(KeyCode::Delete),
                key(KeyCode::Delete),
                ctrl(KeyCode::Right),
                key(KeyCode::Insert),
                key(KeyCode::Char('3')),
                key(KeyCode::Char('4')),
                key(KeyCode::End),
                key(KeyCode::Char(' ')),
                key(KeyCode::Char('z')),
                ctrl(KeyCode::Left),
                ctrl(KeyCode::Left),
                key(KeyCode::Insert),
                ctrl(KeyCode::Char('v')),
            ])
            .collect();

        for (i, k) in keys.iter().enumerate() {
            h.editor.handle_key(k);
            let screen = h.screen();
            let (row, col) = screen.cursor();
            assert_eq!(
                row * 10 + col,
                h.editor.offset_of(h.editor.cursor),
                "after key {} ({:?})",
                i,
                k.code
            );
        }
        h.assert_consistent(0);

        // shrink back to fit on the row boundary
        h.editor.handle_key(&key(KeyCode::End));
        while h.editor.end_offset() > 20 {
            h.editor.handle_key(&key(KeyCode::Backspace));
            h.assert_consistent(0);
        }
        h.editor.handle_key(&key(KeyCode::End));
        h.assert_consistent(0);
    }

    #[test]
    fn test_background_output_over_wrapped_input() {
        let mut h = harness(10);
        h.editor.begin_line();
        type_str(&mut h.editor, "0123456789abcdef");
        for _ in 0..9 {
            h.editor.handle_key(&key(KeyCode::Left));
        }
        h.console.write_line(Stream::Stdout, "log line");
        h.assert_consistent(1);
        h.editor.handle_key(&key(KeyCode::End));
        h.assert_consistent(1);
    }

    struct Recorder {
        lines: Mutex<Vec<String>>,
        shutdowns: Mutex<usize>,
        response: WaitHandle,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                lines: Mutex::new(Vec::new()),
                shutdowns: Mutex::new(0),
                response: WaitHandle::new(),
            }
        }
    }

    impl Collaborator for Recorder {
        fn response_handle(&self) -> Option<WaitHandle> {
            Some(self.response.clone())
        }

        fn on_line_submitted(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
            self.response.set();
        }

        fn shutdown(&self) {
            *self.shutdowns.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_run_forwards_lines_until_quit() {
        let mut h = harness(80);
        h.tx.send(b"hello\r\r  \rworld\r!Q\r".to_vec()).unwrap();
        let client = Recorder::new();
        let stop = AtomicBool::new(false);
        assert!(h.editor.run(&client, &stop).is_ok());
        assert_eq!(*client.lines.lock().unwrap(), vec!["hello", "world"]);
        assert_eq!(*client.shutdowns.lock().unwrap(), 1);
        assert_eq!(h.editor.state(), EditorState::Stopped);
    }

    #[test]
    fn test_run_interrupt_is_fatal() {
        let mut h = harness(80);
        h.tx.send(b"ab\x03".to_vec()).unwrap();
        let client = Recorder::new();
        let stop = AtomicBool::new(false);
        let result = h.editor.run(&client, &stop);
        assert!(matches!(result, Err(SessionError::Interrupted)));
        assert_eq!(*client.shutdowns.lock().unwrap(), 1);
        assert!(client.lines.lock().unwrap().is_empty());
        assert!(h.term.stdout().ends_with("ab^C\n"));
        assert!(h.term.stderr().contains(INTERRUPT_NOTICE));
        assert!(h.prompt.snapshot().is_hidden());
        assert_eq!(h.editor.state(), EditorState::Stopped);
    }

    #[test]
    fn test_run_ends_on_closed_input() {
        let mut h = harness(80);
        h.tx.send(b"partial".to_vec()).unwrap();
        drop(h.tx);
        let client = Recorder::new();
        let stop = AtomicBool::new(false);
        assert!(h.editor.run(&client, &stop).is_ok());
        assert!(client.lines.lock().unwrap().is_empty());
        assert_eq!(*client.shutdowns.lock().unwrap(), 1);
        assert!(h.prompt.snapshot().is_hidden());
    }

    #[test]
    fn test_stop_flag_cancels_before_reading() {
        let mut h = harness(80);
        let stop = AtomicBool::new(true);
        assert_eq!(h.editor.read_line(&stop), ReadOutcome::Cancelled);
        assert_eq!(h.editor.state(), EditorState::Stopped);
        assert!(h.term.stdout().is_empty());
    }

    #[test]
    fn test_stop_flag_cancels_mid_edit() {
        let mut h = harness(80);
        h.tx.send(b"ab".to_vec()).unwrap();
        let client = Recorder::new();
        let stop = Arc::new(AtomicBool::new(false));
        let raiser = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                stop.store(true, Ordering::SeqCst);
            })
        };
        assert!(h.editor.run(&client, &stop).is_ok());
        raiser.join().unwrap();

        assert!(client.lines.lock().unwrap().is_empty());
        assert_eq!(*client.shutdowns.lock().unwrap(), 1);
        assert_eq!(h.editor.state(), EditorState::Stopped);
        assert!(h.prompt.snapshot().is_hidden());
        assert_eq!(h.console.pending(Stream::Stdout), "");
        assert!(!h.term.stdout().contains('\n'));
        assert!(h.screen().lines().is_empty());
    }

    #[test]
    fn test_quit_commands() {
        assert!(is_quit_command("!q"));
        assert!(is_quit_command("\\QUIT"));
        assert!(is_quit_command(" !quit "));
        assert!(!is_quit_command("quit"));
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.timeouts.motd_secs = -1.0;
        config.timeouts.response_secs = 0.25;
        let options = EditorOptions::from_config(&config);
        assert_eq!(options.motd_timeout, Duration::ZERO);
        assert_eq!(options.response_timeout, Duration::from_millis(250));
        assert_eq!(options.max_history, HISTORY_LIMIT);
        assert_eq!(options.query_timeout, Duration::from_millis(300));
    }

    #[test]
    fn test_word_boundaries() {
        let buf: Vec<char> = "  foo  bar".chars().collect();
        assert_eq!(word_start_before(&buf, 10), 7);
        assert_eq!(word_start_before(&buf, 7), 2);
        assert_eq!(word_start_before(&buf, 2), 0);
        assert_eq!(word_start_after(&buf, 0), 2);
        assert_eq!(word_start_after(&buf, 2), 7);
        assert_eq!(word_start_after(&buf, 7), 10);
    }
}
