//! Command history for the line editor
//!
//! In-memory only: entries live as long as the session.

/// Default maximum number of history entries
pub const HISTORY_LIMIT: usize = 200;

/// Submitted lines, oldest first
#[derive(Debug, Clone)]
pub struct CommandHistory {
    entries: Vec<String>,
    /// Maximum entries (0 = unbounded)
    max_entries: usize,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl CommandHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
        }
    }

    /// Record a submitted line exactly as typed, dropping the oldest
    /// entries beyond the cap
    pub fn add(&mut self, line: &str) {
        self.entries.push(line.to_string());
        if self.max_entries > 0 && self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
