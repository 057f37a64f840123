//! Escape-sequence aware text helpers
//!
//! Everything here is pure: splitting text into printable runs and CSI
//! sequences, stripping the sequences that must not be replayed on redraw,
//! and measuring how many terminal cells a string occupies.

use std::fmt;
use std::str::FromStr;

use crossterm::style::{Color, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::Command;
use unicode_width::UnicodeWidthChar;

const ESC: u8 = 0x1b;

/// Control bytes that never belong in buffered screen text
const STRIPPED_CONTROLS: [char; 6] = ['\x07', '\x08', '\x0b', '\x00', '\x7f', '\r'];

/// A piece of text as seen by the terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Printable text (may still contain C0 controls)
    Text(&'a str),
    /// SGR sequence (`ESC [ ... m`)
    Color(&'a str),
    /// Any other CSI sequence: cursor motion, erase, queries
    Control(&'a str),
}

/// Iterator over the segments of a string
pub struct Segments<'a> {
    src: &'a str,
    pos: usize,
}

/// Split `s` into text runs and CSI sequences.
///
/// Incomplete or malformed sequences are reported as text so they pass
/// through untouched.
pub fn segments(s: &str) -> Segments<'_> {
    Segments { src: s, pos: 0 }
}

/// Length of the CSI sequence starting at `start`, if there is a complete one
fn csi_len(bytes: &[u8], start: usize) -> Option<usize> {
    if bytes.get(start) != Some(&ESC) || bytes.get(start + 1) != Some(&b'[') {
        return None;
    }
    let mut i = start + 2;
    while let Some(&b) = bytes.get(i) {
        if (0x30..=0x3f).contains(&b) {
            i += 1;
        } else {
            break;
        }
    }
    while let Some(&b) = bytes.get(i) {
        if (0x20..=0x2f).contains(&b) {
            i += 1;
        } else {
            break;
        }
    }
    match bytes.get(i) {
        Some(&b) if (0x40..=0x7e).contains(&b) => Some(i + 1 - start),
        _ => None,
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        let bytes = self.src.as_bytes();
        if self.pos >= bytes.len() {
            return None;
        }

        if let Some(len) = csi_len(bytes, self.pos) {
            let seq = &self.src[self.pos..self.pos + len];
            self.pos += len;
            return Some(if seq.ends_with('m') || seq.ends_with('M') {
                Segment::Color(seq)
            } else {
                Segment::Control(seq)
            });
        }

        // Text runs up to the next complete CSI sequence
        let start = self.pos;
        let mut i = start + 1;
        while i < bytes.len() {
            if bytes[i] == ESC && csi_len(bytes, i).is_some() {
                break;
            }
            i += 1;
        }
        self.pos = i;
        Some(Segment::Text(&self.src[start..i]))
    }
}

/// Remove non-color CSI sequences and stray control bytes.
pub fn strip_escapes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for seg in segments(s) {
        match seg {
            Segment::Text(t) => out.extend(t.chars().filter(|c| !STRIPPED_CONTROLS.contains(c))),
            Segment::Color(c) => out.push_str(c),
            Segment::Control(_) => {}
        }
    }
    out
}

/// Remove SGR (color) sequences only.
pub fn strip_colors(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for seg in segments(s) {
        match seg {
            Segment::Text(t) | Segment::Control(t) => out.push_str(t),
            Segment::Color(_) => {}
        }
    }
    out
}

/// Number of terminal cells `s` occupies once every escape is ignored.
pub fn visible_len(s: &str) -> usize {
    str_width(&strip_escapes(&strip_colors(s)))
}

/// Display width of a single character (controls count as zero)
pub fn char_width(c: char) -> usize {
    c.width().unwrap_or(0)
}

/// Display width of plain text
pub fn str_width(s: &str) -> usize {
    s.chars().map(char_width).sum()
}

/// Make arbitrary (pasted) text safe to echo as part of one input line.
///
/// Escape sequences are dropped, tabs and line breaks become spaces and any
/// remaining control character is discarded.
pub fn sanitize_input(s: &str) -> String {
    strip_escapes(&strip_colors(s))
        .chars()
        .filter_map(|c| match c {
            '\t' | '\n' => Some(' '),
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

/// Append the ANSI form of a crossterm command to a string buffer.
pub fn push_cmd(out: &mut String, cmd: impl Command) {
    // fmt::Write for String never fails
    let _ = cmd.write_ansi(out);
}

/// Named 256-color palette entries used for console output
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamedColor {
    Blue,
    Gray,
    DarkGray,
    Yellow,
    Orange,
    Red,
    BrightRed,
    Green,
    Cyan,
    Magenta,
    White,
}

impl NamedColor {
    pub const ALL: [NamedColor; 11] = [
        NamedColor::Blue,
        NamedColor::Gray,
        NamedColor::DarkGray,
        NamedColor::Yellow,
        NamedColor::Orange,
        NamedColor::Red,
        NamedColor::BrightRed,
        NamedColor::Green,
        NamedColor::Cyan,
        NamedColor::Magenta,
        NamedColor::White,
    ];

    /// xterm 256-color index
    pub fn index(self) -> u8 {
        match self {
            NamedColor::Blue => 45,
            NamedColor::Gray => 247,
            NamedColor::DarkGray => 238,
            NamedColor::Yellow => 227,
            NamedColor::Orange => 214,
            NamedColor::Red => 160,
            NamedColor::BrightRed => 196,
            NamedColor::Green => 114,
            NamedColor::Cyan => 51,
            NamedColor::Magenta => 170,
            NamedColor::White => 254,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            NamedColor::Blue => "blue",
            NamedColor::Gray => "gray",
            NamedColor::DarkGray => "dark-gray",
            NamedColor::Yellow => "yellow",
            NamedColor::Orange => "orange",
            NamedColor::Red => "red",
            NamedColor::BrightRed => "bright-red",
            NamedColor::Green => "green",
            NamedColor::Cyan => "cyan",
            NamedColor::Magenta => "magenta",
            NamedColor::White => "white",
        }
    }

    pub fn to_crossterm(self) -> Color {
        Color::AnsiValue(self.index())
    }
}

impl fmt::Display for NamedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for an unknown color name
#[derive(Debug, thiserror::Error)]
#[error("unknown color: {0}")]
pub struct UnknownColor(pub String);

impl FromStr for NamedColor {
    type Err = UnknownColor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase().replace('_', "-");
        NamedColor::ALL
            .iter()
            .copied()
            .find(|c| c.name() == lower)
            .ok_or_else(|| UnknownColor(s.to_string()))
    }
}

/// Optional foreground/background colors for one write
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Paint {
    pub fg: Option<NamedColor>,
    pub bg: Option<NamedColor>,
}

impl Paint {
    pub const NONE: Paint = Paint { fg: None, bg: None };

    pub fn fg(color: NamedColor) -> Self {
        Self { fg: Some(color), bg: None }
    }

    pub fn on(self, bg: NamedColor) -> Self {
        Self { bg: Some(bg), ..self }
    }

    pub fn is_plain(&self) -> bool {
        self.fg.is_none() && self.bg.is_none()
    }

    /// Wrap `text` in the SGR sequences for this paint.
    ///
    /// The color is reset before any trailing newline so the next line
    /// starts uncolored.
    pub fn apply(&self, text: &str) -> String {
        if self.is_plain() {
            return text.to_string();
        }
        let (body, tail) = match text.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (text, ""),
        };
        let mut out = String::with_capacity(text.len() + 24);
        if let Some(fg) = self.fg {
            push_cmd(&mut out, SetForegroundColor(fg.to_crossterm()));
        }
        if let Some(bg) = self.bg {
            push_cmd(&mut out, SetBackgroundColor(bg.to_crossterm()));
        }
        out.push_str(body);
        push_cmd(&mut out, ResetColor);
        out.push_str(tail);
        out
    }
}
