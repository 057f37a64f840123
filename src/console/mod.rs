//! Output multiplexer
//!
//! Every byte that reaches the terminal goes through a [`Console`]. Writers
//! on any thread take the console lock for the duration of a
//! [`ConsoleWriter`] batch, so their output is never interleaved. When the
//! interactive prompt is on screen, an ordinary write erases it first,
//! prints its text, and draws the prompt again below, all under one lock.
//!
//! # Bookkeeping
//!
//! Per stream the console remembers who wrote last ([`Source`]) and the
//! "pending" console text: what is rendered after the last real newline.
//! For stdout, the registered [`PromptSource`] supplies the authoritative
//! view of the prompt (text and cursor offset); the pending buffer is the
//! fallback when no prompt is published.
//!
//! # Reentrancy
//!
//! A thread that already holds the console (for example because a log
//! record is emitted while the editor is redrawing) does not deadlock:
//! nested writes are queued and written as soon as the outer batch ends.

mod prompt;
mod terminal;
mod writer;

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::term::ansi::{self, NamedColor, Paint};

pub use prompt::{PromptSnapshot, PromptSource, SharedPrompt};
pub use terminal::{StdTerminal, Terminal};
pub use writer::ConsoleWriter;

#[cfg(test)]
pub use terminal::CaptureTerminal;

/// Output stream of the terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn index(self) -> usize {
        match self {
            Stream::Stdout => 0,
            Stream::Stderr => 1,
        }
    }

    fn other(self) -> Stream {
        match self {
            Stream::Stdout => Stream::Stderr,
            Stream::Stderr => Stream::Stdout,
        }
    }
}

/// Who produced a write
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Source {
    /// Ordinary line output (logs, events, command results)
    #[default]
    Output,
    /// The interactive prompt and the line being edited
    Console,
}

#[derive(Default)]
struct StreamState {
    /// Console text rendered after the last newline, escape-stripped
    pending: Vec<String>,
    last: Source,
}

struct ConsoleState {
    terminal: Box<dyn Terminal>,
    streams: [StreamState; 2],
}

impl ConsoleState {
    fn stream(&self, stream: Stream) -> &StreamState {
        &self.streams[stream.index()]
    }

    fn stream_mut(&mut self, stream: Stream) -> &mut StreamState {
        &mut self.streams[stream.index()]
    }
}

/// What a stream currently shows after its last newline
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct PendingView {
    text: String,
    cells: usize,
    cursor: usize,
}

struct Inner {
    id: usize,
    state: Mutex<ConsoleState>,
    prompt: Option<Arc<dyn PromptSource>>,
    deferred: Mutex<Vec<(Stream, String)>>,
    colors: AtomicBool,
    write_failed: AtomicBool,
}

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Consoles whose lock the current thread holds
    static HELD: RefCell<Vec<usize>> = RefCell::new(Vec::new());
}

/// Shared handle to the terminal output multiplexer
#[derive(Clone)]
pub struct Console {
    inner: Arc<Inner>,
}

impl Console {
    /// Console without a prompt source
    pub fn new(terminal: impl Terminal + 'static) -> Self {
        Self::build(Box::new(terminal), None)
    }

    /// Console that redraws the prompt published by `prompt`
    pub fn with_prompt_source(
        terminal: impl Terminal + 'static,
        prompt: Arc<dyn PromptSource>,
    ) -> Self {
        Self::build(Box::new(terminal), Some(prompt))
    }

    fn build(terminal: Box<dyn Terminal>, prompt: Option<Arc<dyn PromptSource>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(ConsoleState {
                    terminal,
                    streams: Default::default(),
                }),
                prompt,
                deferred: Mutex::new(Vec::new()),
                colors: AtomicBool::new(true),
                write_failed: AtomicBool::new(false),
            }),
        }
    }

    /// Enable or disable SGR colors for everything written from now on
    pub fn set_colors_enabled(&self, enabled: bool) {
        self.inner.colors.store(enabled, Ordering::SeqCst);
    }

    pub fn colors_enabled(&self) -> bool {
        self.inner.colors.load(Ordering::SeqCst)
    }

    /// Print one line of ordinary output above the prompt
    pub fn write_line(&self, stream: Stream, text: &str) {
        self.write_line_with(stream, text, Paint::NONE);
    }

    /// Print one colored line of ordinary output above the prompt
    pub fn write_line_with(&self, stream: Stream, text: &str, paint: Paint) {
        let text = paint.apply(text);
        if self.held_by_current_thread() {
            self.lock_deferred().push((stream, text));
            return;
        }
        let mut w = self.batch(stream, Source::Output);
        w.write_line(&text);
    }

    /// Append raw console text (no newline is forced)
    pub fn write_console(&self, stream: Stream, text: &str) {
        let mut w = self.batch(stream, Source::Console);
        w.write(text);
    }

    /// Collaborator entry point for asynchronous events
    pub fn notify_event(&self, message: &str, color: Option<NamedColor>) {
        let paint = Paint { fg: color, bg: None };
        self.write_line_with(Stream::Stdout, message, paint);
    }

    /// Start an atomic batch of writes on `stream`.
    ///
    /// The lock is held until the returned writer is dropped. A batch opened
    /// by a thread that already holds the console buffers its text and
    /// writes it as ordinary output once the outer batch ends.
    pub fn batch(&self, stream: Stream, source: Source) -> ConsoleWriter<'_> {
        if self.held_by_current_thread() {
            return ConsoleWriter::nested(self, stream);
        }
        let guard = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        HELD.with(|held| held.borrow_mut().push(self.inner.id));
        ConsoleWriter::begin(self, guard, stream, source)
    }

    /// Escape-stripped console text currently pending on `stream`
    #[cfg(test)]
    pub fn pending(&self, stream: Stream) -> String {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.stream(stream).pending.concat()
    }

    fn held_by_current_thread(&self) -> bool {
        HELD.with(|held| held.borrow().contains(&self.inner.id))
    }

    fn release_held(&self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&id| id == self.inner.id) {
                held.remove(pos);
            }
        });
    }

    fn lock_deferred(&self) -> MutexGuard<'_, Vec<(Stream, String)>> {
        self.inner.deferred.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write lines queued by nested writers
    fn replay_deferred(&self) {
        let queued = std::mem::take(&mut *self.lock_deferred());
        for (stream, text) in queued {
            let mut w = self.batch(stream, Source::Output);
            w.write_line(&text);
        }
    }

    /// Current view of the console text on `stream`
    fn pending_view(&self, state: &ConsoleState, stream: Stream) -> PendingView {
        if stream == Stream::Stdout {
            if let Some(source) = &self.inner.prompt {
                let snap = source.snapshot();
                if !snap.is_hidden() {
                    let cells = snap.cells();
                    return PendingView {
                        text: snap.rendered(),
                        cells,
                        cursor: snap.cursor_offset.min(cells),
                    };
                }
            }
        }
        let text = state.stream(stream).pending.concat();
        let cells = ansi::visible_len(&text);
        PendingView { text, cells, cursor: cells }
    }
}
