//! Output sink behind the console

use std::io::{self, Write};

use super::Stream;

/// Where console bytes end up
pub trait Terminal: Send {
    /// Write and flush `bytes` on `stream`
    fn write(&mut self, stream: Stream, bytes: &[u8]) -> io::Result<()>;

    /// Terminal size as (cols, rows), never zero
    fn size(&self) -> (u16, u16);
}

/// The process's stdout/stderr
pub struct StdTerminal;

impl Terminal for StdTerminal {
    fn write(&mut self, stream: Stream, bytes: &[u8]) -> io::Result<()> {
        match stream {
            Stream::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(bytes)?;
                out.flush()
            }
            Stream::Stderr => {
                let mut err = io::stderr().lock();
                err.write_all(bytes)?;
                err.flush()
            }
        }
    }

    fn size(&self) -> (u16, u16) {
        let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
        (cols.max(1), rows.max(1))
    }
}

#[cfg(test)]
pub use capture::CaptureTerminal;
