//! What the live prompt looks like right now
//!
//! The editor thread publishes a [`PromptSnapshot`] after every change; the
//! console asks its [`PromptSource`] for one whenever another thread's
//! output has to be drawn above the prompt. Snapshots are copies, so a
//! reader never sees a half-edited line.

use std::sync::Mutex;

use crate::term::ansi;

/// Copy of the prompt line as it is on screen
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PromptSnapshot {
    /// Rendered prompt, escapes included
    pub prompt: String,
    /// Current input text
    pub input: String,
    /// Cursor position in cells from the start of the prompt
    pub cursor_offset: usize,
}

impl PromptSnapshot {
    /// A prompt that is not displayed (no input in progress)
    pub fn hidden() -> Self {
        Self::default()
    }

    pub fn is_hidden(&self) -> bool {
        self.prompt.is_empty() && self.input.is_empty()
    }

    /// Prompt followed by input, as written to the terminal
    pub fn rendered(&self) -> String {
        let mut out = String::with_capacity(self.prompt.len() + self.input.len());
        out.push_str(&self.prompt);
        out.push_str(&self.input);
        out
    }

    /// Cells taken by [`rendered`](Self::rendered)
    pub fn cells(&self) -> usize {
        ansi::visible_len(&self.prompt) + ansi::visible_len(&self.input)
    }
}

/// Source of prompt snapshots for redraws
pub trait PromptSource: Send + Sync {
    fn snapshot(&self) -> PromptSnapshot;
}

/// Snapshot cell shared between the editor (writer) and the console (reader)
#[derive(Debug, Default)]
pub struct SharedPrompt {
    current: Mutex<PromptSnapshot>,
}

impl SharedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: PromptSnapshot) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    pub fn hide(&self) {
        self.publish(PromptSnapshot::hidden());
    }
}

impl PromptSource for SharedPrompt {
    fn snapshot(&self) -> PromptSnapshot {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
