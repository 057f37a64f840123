//! Minimal VT screen model for tests
//!
//! Replays captured output and tracks what a real terminal would show: an
//! unbounded grid of rows with auto-wrap (including the deferred wrap after
//! the last column), CR/LF, relative and absolute cursor motion and erase.
//! Colors are parsed and ignored.

use unicode_width::UnicodeWidthChar;

#[derive(Clone, Copy, Default, PartialEq)]
enum ParserState {
    #[default]
    Ground,
    Escape,
    Csi,
}

pub struct Screen {
    cols: usize,
    grid: Vec<Vec<char>>,
    row: usize,
    col: usize,
    /// Cursor is past the last column; the next printable wraps first
    pending_wrap: bool,
    state: ParserState,
    params: String,
}

impl Screen {
    pub fn new(cols: u16) -> Self {
        let cols = cols.max(1) as usize;
        Self {
            cols,
            grid: vec![vec![' '; cols]],
            row: 0,
            col: 0,
            pending_wrap: false,
            state: ParserState::Ground,
            params: String::new(),
        }
    }

    /// Feed terminal output
    pub fn feed(&mut self, text: &str) {
        for ch in text.chars() {
            self.feed_char(ch);
        }
    }

    /// Cursor as (row, col), both 0-based
    pub fn cursor(&self) -> (usize, usize) {
        (self.row, self.col)
    }

    /// Text of one row without trailing blanks
    pub fn line(&self, row: usize) -> String {
        self.grid
            .get(row)
            .map(|r| r.iter().collect::<String>().trim_end().to_string())
            .unwrap_or_default()
    }

    /// All rows, with trailing empty rows removed
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = (0..self.grid.len()).map(|r| self.line(r)).collect();
        while lines.last().map_or(false, |l| l.is_empty()) {
            lines.pop();
        }
        lines
    }

    fn feed_char(&mut self, ch: char) {
        match self.state {
            ParserState::Ground => self.ground(ch),
            ParserState::Escape => {
                if ch == '[' {
                    self.params.clear();
                    self.state = ParserState::Csi;
                } else {
                    self.state = ParserState::Ground;
                }
            }
            ParserState::Csi => {
                if ('\x40'..='\x7e').contains(&ch) {
                    self.state = ParserState::Ground;
                    self.execute_csi(ch);
                } else {
                    self.params.push(ch);
                }
            }
        }
    }

    fn ground(&mut self, ch: char) {
        match ch {
            '\x1b' => self.state = ParserState::Escape,
            '\r' => {
                self.col = 0;
                self.pending_wrap = false;
            }
            // output post-processing turns LF into CR LF
            '\n' => {
                self.col = 0;
                self.pending_wrap = false;
                self.linefeed();
            }
            '\x08' => {
                self.pending_wrap = false;
                self.col = self.col.saturating_sub(1);
            }
            c if c.is_control() => {}
            c => self.put_char(c),
        }
    }

    fn put_char(&mut self, ch: char) {
        let width = ch.width().unwrap_or(0).max(1);
        if self.pending_wrap || self.col + width > self.cols {
            self.col = 0;
            self.pending_wrap = false;
            self.linefeed();
        }
        self.grid[self.row][self.col] = ch;
        for extra in 1..width {
            if self.col + extra < self.cols {
                self.grid[self.row][self.col + extra] = ' ';
            }
        }
        if self.col + width >= self.cols {
            self.col = self.cols - 1;
            self.pending_wrap = true;
        } else {
            self.col += width;
        }
    }

    fn linefeed(&mut self) {
        self.row += 1;
        while self.grid.len() <= self.row {
            self.grid.push(vec![' '; self.cols]);
        }
    }

    fn param(&self, idx: usize, default: usize) -> usize {
        self.params
            .split(';')
            .nth(idx)
            .and_then(|p| p.parse::<usize>().ok())
            .filter(|&n| n != 0)
            .unwrap_or(default)
    }

    fn execute_csi(&mut self, final_char: char) {
        match final_char {
            'A' => {
                self.pending_wrap = false;
                self.row = self.row.saturating_sub(self.param(0, 1));
            }
            'B' => {
                self.pending_wrap = false;
                self.row += self.param(0, 1);
                while self.grid.len() <= self.row {
                    self.grid.push(vec![' '; self.cols]);
                }
            }
            'C' => {
                self.pending_wrap = false;
                self.col = (self.col + self.param(0, 1)).min(self.cols - 1);
            }
            'D' => {
                self.pending_wrap = false;
                self.col = self.col.saturating_sub(self.param(0, 1));
            }
            'G' => {
                self.pending_wrap = false;
                self.col = (self.param(0, 1) - 1).min(self.cols - 1);
            }
            'K' => {
                let mode = self.params.parse::<usize>().unwrap_or(0);
                let range = match mode {
                    1 => 0..self.col + 1,
                    2 => 0..self.cols,
                    _ => self.col..self.cols,
                };
                let row = self.row;
                for cell in &mut self.grid[row][range] {
                    *cell = ' ';
                }
            }
            'J' => {
                for row in self.grid.iter_mut().skip(self.row + 1) {
                    row.iter_mut().for_each(|c| *c = ' ');
                }
                for cell in &mut self.grid[self.row][self.col..] {
                    *cell = ' ';
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deferred_wrap() {
        let mut screen = Screen::new(4);
        screen.feed("abcd");
        assert_eq!(screen.cursor(), (0, 3));
        screen.feed("e");
        assert_eq!(screen.cursor(), (1, 1));
        assert_eq!(screen.lines(), vec!["abcd", "e"]);
    }

    #[test]
    fn test_settle_moves_to_next_row() {
        let mut screen = Screen::new(4);
        screen.feed("abcd \r");
        assert_eq!(screen.cursor(), (1, 0));
    }

    #[test]
    fn test_motion_and_erase() {
        let mut screen = Screen::new(10);
        screen.feed("hello\nworld\x1b[1A\x1b[3G\x1b[K");
        assert_eq!(screen.lines(), vec!["he", "world"]);
        assert_eq!(screen.cursor(), (0, 2));
        screen.feed("\x1b[31mY\x1b[0m");
        assert_eq!(screen.line(0), "heY");
    }
}
