//! Relative cursor motion over wrapped input
//!
//! Offsets are counted in cells from the first column of the row where the
//! prompt starts, so `offset / cols` is the row and `offset % cols` the
//! column. Callers keep the physical cursor consistent with that model by
//! calling [`settle_wrap`] after writing text that ends on a row boundary.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crossterm::cursor::{MoveDown, MoveLeft, MoveRight, MoveToColumn, MoveUp};

use super::ansi::push_cmd;
use super::input::{ByteRead, KeyReader};

/// Longest input we scan while waiting for a position report
const MAX_QUERY_BYTES: usize = 64;

/// Terminal-reported cursor position (1-based, as the terminal reports it)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CursorPos {
    pub row: u16,
    pub col: u16,
}

fn split(offset: usize, cols: usize) -> (usize, usize) {
    (offset / cols, offset % cols)
}

/// Move the cursor `n` cells to the left of `known_offset`.
///
/// `n` is clamped so the cursor never moves before the start of the input.
/// Returns the new offset.
pub fn move_left_relative(out: &mut String, n: usize, known_offset: usize, cols: u16) -> usize {
    let cols = cols.max(1) as usize;
    let n = n.min(known_offset);
    if n == 0 {
        return known_offset;
    }
    let target = known_offset - n;
    let (row, _) = split(known_offset, cols);
    let (trow, tcol) = split(target, cols);
    if row == trow {
        push_cmd(out, MoveLeft(clamp_u16(n)));
    } else {
        push_cmd(out, MoveUp(clamp_u16(row - trow)));
        push_cmd(out, MoveToColumn(clamp_u16(tcol)));
    }
    target
}

/// Move the cursor `n` cells to the right of `known_offset`.
///
/// Only used over cells that are already rendered, so moving down never
/// needs to scroll. Returns the new offset.
pub fn move_right_relative(out: &mut String, n: usize, known_offset: usize, cols: u16) -> usize {
    let cols = cols.max(1) as usize;
    if n == 0 {
        return known_offset;
    }
    let target = known_offset + n;
    let (row, _) = split(known_offset, cols);
    let (trow, tcol) = split(target, cols);
    if row == trow {
        push_cmd(out, MoveRight(clamp_u16(n)));
    } else {
        push_cmd(out, MoveDown(clamp_u16(trow - row)));
        push_cmd(out, MoveToColumn(clamp_u16(tcol)));
    }
    target
}

/// Put the physical cursor on the next row when output stopped exactly at a
/// row boundary.
///
/// Terminals defer the wrap after the last column; writing a blank and a
/// carriage return forces it so the cursor sits where the offset model
/// expects it.
pub fn settle_wrap(out: &mut String, offset: usize, cols: u16) {
    let cols = cols.max(1) as usize;
    if offset > 0 && offset % cols == 0 {
        out.push_str(" \r");
    }
}

fn clamp_u16(n: usize) -> u16 {
    n.min(u16::MAX as usize) as u16
}

/// Find a cursor position report (`ESC [ row ; col R`) ending `buf`.
///
/// Returns the index of the report's ESC and the parsed position.
pub fn parse_cursor_report(buf: &[u8]) -> Option<(usize, CursorPos)> {
    let esc = buf.iter().rposition(|&b| b == 0x1b)?;
    let body = buf[esc + 1..].strip_prefix(b"[")?.strip_suffix(b"R")?;
    let text = std::str::from_utf8(body).ok()?;
    let (row, col) = text.split_once(';')?;
    let row = row.parse::<u16>().ok()?;
    let col = col.parse::<u16>().ok()?;
    Some((esc, CursorPos { row, col }))
}

/// Ask the terminal where the cursor is.
///
/// Keystrokes typed while waiting for the reply are pushed back into
/// `input`. Returns `None` when no well-formed reply arrives in time; the
/// reply may then still show up later and is discarded by the key decoder.
pub fn query_cursor_position(
    out: &mut impl Write,
    input: &mut KeyReader,
    timeout: Duration,
) -> io::Result<Option<CursorPos>> {
    out.write_all(b"\x1b[6n")?;
    out.flush()?;

    let deadline = Instant::now() + timeout;
    let mut buf = Vec::new();
    while buf.len() < MAX_QUERY_BYTES {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match input.next_byte(remaining) {
            ByteRead::Byte(b) => {
                buf.push(b);
                if b == b'R' {
                    if let Some((esc, pos)) = parse_cursor_report(&buf) {
                        input.unread(&buf[..esc]);
                        return Ok(Some(pos));
                    }
                }
            }
            ByteRead::Timeout | ByteRead::Closed => break,
        }
    }
    input.unread(&buf);
    Ok(None)
}
