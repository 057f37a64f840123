//! Keystroke input
//!
//! A reader thread pumps raw stdin bytes into a channel; [`KeyReader`]
//! decodes them into crossterm key events. Bytes can be pushed back with
//! [`KeyReader::unread`], which the cursor position query uses to re-inject
//! keystrokes it consumed while looking for the terminal's reply.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::debug;

/// How long a lone ESC waits for the rest of a sequence
const ESC_TIMEOUT: Duration = Duration::from_millis(50);

/// Poll interval of the key loop (bounds how late a stop request is noticed)
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on a CSI sequence we are willing to collect
const MAX_CSI_LEN: usize = 32;

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl Modifiers {
    /// Decode an xterm modifier parameter (`1 + shift + 2*alt + 4*ctrl`)
    pub fn from_xterm(code: u16) -> Self {
        let bits = code.saturating_sub(1);
        let mut result = Modifiers::empty();
        if bits & 1 != 0 {
            result |= Modifiers::SHIFT;
        }
        if bits & 2 != 0 {
            result |= Modifiers::ALT;
        }
        if bits & 4 != 0 {
            result |= Modifiers::CTRL;
        }
        result
    }
}

impl From<Modifiers> for KeyModifiers {
    fn from(mods: Modifiers) -> Self {
        let mut result = KeyModifiers::NONE;
        if mods.contains(Modifiers::SHIFT) {
            result |= KeyModifiers::SHIFT;
        }
        if mods.contains(Modifiers::CTRL) {
            result |= KeyModifiers::CONTROL;
        }
        if mods.contains(Modifiers::ALT) {
            result |= KeyModifiers::ALT;
        }
        result
    }
}

/// Result of reading one byte
#[derive(Debug, PartialEq)]
pub enum ByteRead {
    Byte(u8),
    Timeout,
    Closed,
}

/// Result of reading one keystroke
#[derive(Debug, PartialEq)]
pub enum KeyRead {
    Key(KeyEvent),
    /// Ctrl+C
    Interrupted,
    /// Input stream ended
    Closed,
    /// The stop flag was raised while waiting
    Cancelled,
}

/// Decodes raw terminal bytes into keystrokes
pub struct KeyReader {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    closed: bool,
    poll: Duration,
}

impl KeyReader {
    /// Start a thread reading the process's stdin
    pub fn spawn_stdin() -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                let mut buffer = vec![0u8; 1024];
                loop {
                    match stdin.lock().read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            if tx.send(buffer[..n].to_vec()).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            debug!("stdin read failed: {}", e);
                            break;
                        }
                    }
                }
            })?;
        Ok(Self::from_channel(rx))
    }

    /// Read from an existing byte channel
    pub fn from_channel(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: VecDeque::new(),
            closed: false,
            poll: POLL_INTERVAL,
        }
    }

    /// Push bytes back so they are read again, in order, before anything else
    pub fn unread(&mut self, bytes: &[u8]) {
        for &b in bytes.iter().rev() {
            self.pending.push_front(b);
        }
    }

    /// Read one byte, waiting at most `timeout`
    pub fn next_byte(&mut self, timeout: Duration) -> ByteRead {
        loop {
            if let Some(b) = self.pending.pop_front() {
                return ByteRead::Byte(b);
            }
            if self.closed {
                return ByteRead::Closed;
            }
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => return ByteRead::Timeout,
                Err(RecvTimeoutError::Disconnected) => self.closed = true,
            }
        }
    }

    /// Block until a keystroke arrives, input ends or `stop` is raised
    pub fn next_key(&mut self, stop: &AtomicBool) -> KeyRead {
        loop {
            if stop.load(Ordering::SeqCst) {
                return KeyRead::Cancelled;
            }
            match self.next_byte(self.poll) {
                ByteRead::Timeout => continue,
                ByteRead::Closed => return KeyRead::Closed,
                ByteRead::Byte(b) => {
                    if let Some(read) = self.decode(b) {
                        return read;
                    }
                }
            }
        }
    }

    fn decode(&mut self, first: u8) -> Option<KeyRead> {
        let key = match first {
            0x03 => return Some(KeyRead::Interrupted),
            b'\r' | b'\n' => plain(KeyCode::Enter),
            0x7f | 0x08 => plain(KeyCode::Backspace),
            b'\t' => plain(KeyCode::Tab),
            0x1b => return self.decode_escape(),
            0x00 => ctrl(' '),
            0x01..=0x1a => ctrl((first - 1 + b'a') as char),
            0x1c => ctrl('\\'),
            0x1d => ctrl(']'),
            0x1e => ctrl('^'),
            0x1f => ctrl('_'),
            0x20..=0x7e => plain(KeyCode::Char(first as char)),
            _ => plain(KeyCode::Char(self.decode_utf8(first))),
        };
        Some(KeyRead::Key(key))
    }

    fn decode_utf8(&mut self, lead: u8) -> char {
        let len = match lead {
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return char::REPLACEMENT_CHARACTER,
        };
        let mut bytes = vec![lead];
        while bytes.len() < len {
            match self.next_byte(ESC_TIMEOUT) {
                ByteRead::Byte(b) if b & 0xc0 == 0x80 => bytes.push(b),
                ByteRead::Byte(b) => {
                    self.unread(&[b]);
                    break;
                }
                _ => break,
            }
        }
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    fn decode_escape(&mut self) -> Option<KeyRead> {
        let key = match self.next_byte(ESC_TIMEOUT) {
            ByteRead::Byte(b'[') => return self.decode_csi(),
            ByteRead::Byte(b'O') => return self.decode_ss3(),
            ByteRead::Byte(b @ 0x20..=0x7e) => {
                KeyEvent::new(KeyCode::Char(b as char), KeyModifiers::ALT)
            }
            ByteRead::Byte(b) => {
                self.unread(&[b]);
                plain(KeyCode::Esc)
            }
            ByteRead::Timeout | ByteRead::Closed => plain(KeyCode::Esc),
        };
        Some(KeyRead::Key(key))
    }

    fn decode_csi(&mut self) -> Option<KeyRead> {
        let mut params = Vec::new();
        let final_byte = loop {
            match self.next_byte(ESC_TIMEOUT) {
                ByteRead::Byte(b @ 0x40..=0x7e) => break b,
                ByteRead::Byte(b @ 0x20..=0x3f) if params.len() < MAX_CSI_LEN => params.push(b),
                // Truncated or garbled sequence: drop it
                _ => return None,
            }
        };

        let fields: Vec<u16> = params
            .split(|&b| b == b';')
            .map(|f| std::str::from_utf8(f).ok().and_then(|s| s.parse().ok()).unwrap_or(0))
            .collect();
        let mods = Modifiers::from_xterm(fields.get(1).copied().unwrap_or(1));

        let code = match final_byte {
            b'A' => KeyCode::Up,
            b'B' => KeyCode::Down,
            b'C' => KeyCode::Right,
            b'D' => KeyCode::Left,
            b'H' => KeyCode::Home,
            b'F' => KeyCode::End,
            b'Z' => return Some(KeyRead::Key(KeyEvent::new(KeyCode::BackTab, KeyModifiers::SHIFT))),
            b'~' => match fields.first().copied().unwrap_or(0) {
                1 | 7 => KeyCode::Home,
                2 => KeyCode::Insert,
                3 => KeyCode::Delete,
                4 | 8 => KeyCode::End,
                5 => KeyCode::PageUp,
                6 => KeyCode::PageDown,
                n @ 11..=15 => KeyCode::F((n - 10) as u8),
                n @ 17..=21 => KeyCode::F((n - 11) as u8),
                n @ 23..=24 => KeyCode::F((n - 12) as u8),
                _ => return None,
            },
            // Cursor position reports that arrive late are not keystrokes
            b'R' => return None,
            _ => return None,
        };
        Some(KeyRead::Key(KeyEvent::new(code, mods.into())))
    }

    fn decode_ss3(&mut self) -> Option<KeyRead> {
        let code = match self.next_byte(ESC_TIMEOUT) {
            ByteRead::Byte(b'A') => KeyCode::Up,
            ByteRead::Byte(b'B') => KeyCode::Down,
            ByteRead::Byte(b'C') => KeyCode::Right,
            ByteRead::Byte(b'D') => KeyCode::Left,
            ByteRead::Byte(b'H') => KeyCode::Home,
            ByteRead::Byte(b'F') => KeyCode::End,
            ByteRead::Byte(b @ b'P'..=b'S') => KeyCode::F(b - b'P' + 1),
            _ => return None,
        };
        Some(KeyRead::Key(plain(code)))
    }
}

fn plain(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn ctrl(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
}
