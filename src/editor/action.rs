//! Keystroke to editing action mapping

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

/// What a keystroke does to the input line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditAction {
    Submit,
    HistoryPrev,
    HistoryNext,
    Left,
    Right,
    WordLeft,
    WordRight,
    Home,
    End,
    Backspace,
    Delete,
    ToggleMode,
    Paste,
    Insert(char),
    /// Reserved keys (Tab, Ctrl+R, Esc, ...) and anything unknown
    Ignore,
}

impl EditAction {
    pub fn from_key(key: &KeyEvent) -> Self {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        let shift = key.modifiers.contains(KeyModifiers::SHIFT);

        match key.code {
            KeyCode::Enter => EditAction::Submit,
            KeyCode::Up => EditAction::HistoryPrev,
            KeyCode::Down => EditAction::HistoryNext,
            KeyCode::Left if ctrl || alt => EditAction::WordLeft,
            KeyCode::Right if ctrl || alt => EditAction::WordRight,
            KeyCode::Left => EditAction::Left,
            KeyCode::Right => EditAction::Right,
            KeyCode::Home => EditAction::Home,
            KeyCode::End => EditAction::End,
            KeyCode::Backspace => EditAction::Backspace,
            KeyCode::Delete => EditAction::Delete,
            KeyCode::Insert if shift => EditAction::Paste,
            KeyCode::Insert => EditAction::ToggleMode,

            KeyCode::Char(c) if ctrl && !alt => match c.to_ascii_lowercase() {
                'a' => EditAction::Home,
                'e' => EditAction::End,
                'b' => EditAction::Left,
                'f' => EditAction::Right,
                'v' => EditAction::Paste,
                _ => EditAction::Ignore,
            },
            KeyCode::Char(c) if alt => match c {
                'b' => EditAction::WordLeft,
                'f' => EditAction::WordRight,
                _ => EditAction::Ignore,
            },
            KeyCode::Char(c) if !c.is_control() => EditAction::Insert(c),

            _ => EditAction::Ignore,
        }
    }
}
