//! Logging setup
//!
//! Records go to two places: a plain log file under `~/.botconsole/` and
//! the terminal. Terminal records are written through the [`Console`] like
//! any other output, so they appear above the prompt instead of inside it.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::Config;
use crate::console::{Console, Stream};
use crate::term::ansi::{NamedColor, Paint};

fn level_paint(level: &Level) -> Paint {
    let color = match *level {
        Level::ERROR => NamedColor::Red,
        Level::WARN => NamedColor::Yellow,
        Level::INFO => NamedColor::Gray,
        Level::DEBUG | Level::TRACE => NamedColor::Blue,
    };
    Paint::fg(color)
}

/// `MakeWriter` that turns each record into one console line
pub struct ConsoleLog {
    console: Console,
}

impl ConsoleLog {
    pub fn new(console: Console) -> Self {
        Self { console }
    }
}

/// One formatted record, written to the console when dropped
pub struct LogLine {
    console: Console,
    paint: Paint,
    buf: Vec<u8>,
}

impl io::Write for LogLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogLine {
    fn drop(&mut self) {
        let text = String::from_utf8_lossy(&self.buf);
        let text = text.trim();
        if !text.is_empty() {
            self.console.write_line_with(Stream::Stdout, text, self.paint);
        }
    }
}

impl<'a> MakeWriter<'a> for ConsoleLog {
    type Writer = LogLine;

    fn make_writer(&'a self) -> Self::Writer {
        LogLine {
            console: self.console.clone(),
            paint: level_paint(&Level::INFO),
            buf: Vec::new(),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        LogLine {
            console: self.console.clone(),
            paint: level_paint(meta.level()),
            buf: Vec::new(),
        }
    }
}

/// Terminal layer: no timestamps, level and message only
fn console_layer<S>(console: Console) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    fmt::layer()
        .with_writer(ConsoleLog::new(console))
        .with_ansi(false)
        .with_target(false)
        .without_time()
}

/// Install the global subscriber. Returns the log file path when the file
/// could be opened.
pub fn init(console: &Console, level: &str) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_path = Config::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("botconsole.log");
    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();
    let opened = log_file.is_some();

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
    });

    let result = Registry::default()
        .with(filter)
        .with(file_layer)
        .with(console_layer(console.clone()))
        .try_init();
    if result.is_err() {
        return None;
    }
    opened.then_some(log_path)
}
