//! botconsole - an interactive console for a chat bot
//!
//! botconsole keeps an editable input line pinned at the bottom of the
//! terminal while background threads (protocol events, periodic fetches,
//! log records) print above it. Output from any thread is serialized
//! through one console, and the prompt is erased and redrawn around it with
//! the cursor left where the user had it.
//!
//! # Quick Start
//!
//! ```text
//! botconsole                    # demo client with default settings
//! botconsole --interval 1000    # background event every second
//! botconsole --no-color         # plain output
//! ```
//!
//! # Keys
//!
//! | Key | Action |
//! |-----|--------|
//! | Enter | Submit the line |
//! | Up/Down | Browse history |
//! | Left/Right, Home/End | Move the cursor |
//! | Ctrl+Left/Right | Jump by word |
//! | Insert | Toggle overwrite mode |
//! | Ctrl+V, Shift+Insert | Paste |
//! | Ctrl+C | Quit immediately |

mod client;
mod config;
mod console;
mod editor;
mod logging;
mod term;

use std::env;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::client::{Collaborator, DemoClient, DemoOptions};
use crate::config::{Config, ConfigError};
use crate::console::{Console, SharedPrompt, StdTerminal};
use crate::editor::{EditorOptions, LineEditor, SessionError, SystemClipboard};
use crate::term::input::KeyReader;
use crate::term::raw_mode;

/// Exit status after a keyboard interrupt (128 + SIGINT)
const EXIT_INTERRUPTED: i32 = 130;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line options
#[derive(Debug, Default)]
struct Args {
    config_path: Option<PathBuf>,
    no_color: bool,
    log_level: Option<String>,
    history: Option<usize>,
    interval_ms: Option<u64>,
    room: Option<String>,
}

fn print_version() {
    println!("botconsole {}", VERSION);
}

fn print_help() {
    println!("botconsole {} - interactive console for a chat bot", VERSION);
    println!();
    println!("Usage: botconsole [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -c, --config <PATH>     Read settings from PATH");
    println!("      --no-color          Disable colored output");
    println!("      --log-level <LVL>   error, warn, info, debug or trace");
    println!("      --history <N>       Keep N history entries (0 = unbounded)");
    println!("      --interval <MS>     Background event period (0 = off)");
    println!("      --room <NAME>       Join NAME at startup");
    println!("  -V, --version           Show version");
    println!("  -h, --help              Show this help");
    println!();
    println!("Commands at the prompt:");
    println!("  help                    Demo commands");
    println!("  !q, \\q, !quit, \\quit    Quit");
    println!();
    println!("Configuration: ~/.botconsole/config.toml");
    println!("Log file:      ~/.botconsole/botconsole.log");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
        *i += 1;
        args.get(*i)
            .map(String::as_str)
            .ok_or_else(|| format!("Missing value for {}", flag))
    }

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-V" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                parsed.config_path = Some(PathBuf::from(value(&args, &mut i, "--config")?));
            }
            "--no-color" => {
                parsed.no_color = true;
            }
            "--log-level" => {
                parsed.log_level = Some(value(&args, &mut i, "--log-level")?.to_string());
            }
            "--history" => {
                let n = value(&args, &mut i, "--history")?;
                parsed.history =
                    Some(n.parse().map_err(|_| format!("Invalid history size: {}", n))?);
            }
            "--interval" => {
                let ms = value(&args, &mut i, "--interval")?;
                parsed.interval_ms =
                    Some(ms.parse().map_err(|_| format!("Invalid interval: {}", ms))?);
            }
            "--room" => {
                parsed.room = Some(value(&args, &mut i, "--room")?.to_string());
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

/// File settings with command line overrides applied. A config file that
/// cannot be used gives the defaults plus the error, to be logged once the
/// subscriber is installed.
fn load_config(args: &Args) -> (Config, Option<ConfigError>) {
    let loaded = match &args.config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let (mut config, error) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    if args.no_color {
        config.enable_colors = false;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(n) = args.history {
        config.history.max_lines = n;
    }
    if let Some(ms) = args.interval_ms {
        config.demo.event_interval_ms = ms;
    }
    if args.room.is_some() {
        config.demo.room = args.room.clone();
    }
    (config, error)
}

/// Raise `stop` on SIGTERM and SIGHUP so the session ends through its
/// normal cleanup
#[cfg(unix)]
fn register_signals(stop: &Arc<AtomicBool>) {
    use signal_hook::consts::{SIGHUP, SIGTERM};
    for signal in [SIGTERM, SIGHUP] {
        if let Err(e) = signal_hook::flag::register(signal, Arc::clone(stop)) {
            tracing::error!("failed to register handler for signal {}: {}", signal, e);
        }
    }
}

#[cfg(not(unix))]
fn register_signals(_stop: &Arc<AtomicBool>) {}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let (config, config_error) = load_config(&args);

    let prompt = Arc::new(SharedPrompt::new());
    let console = Console::with_prompt_source(StdTerminal, prompt.clone());
    console.set_colors_enabled(config.enable_colors);

    if let Some(path) = logging::init(&console, &config.log_level) {
        debug!("logging to {}", path.display());
    }
    if let Some(e) = config_error {
        warn!("{}, using defaults", e);
    }
    info!("botconsole {} starting", VERSION);

    raw_mode::install_panic_hook();
    let mut guard = raw_mode::acquire(raw_mode::platform());

    let stop = Arc::new(AtomicBool::new(false));
    register_signals(&stop);

    let input = KeyReader::spawn_stdin().context("failed to start the input reader")?;
    let client = DemoClient::start(
        console.clone(),
        DemoOptions {
            event_interval: Duration::from_millis(config.demo.event_interval_ms),
            room: config.demo.room.clone(),
        },
    );

    let mut options = EditorOptions::from_config(&config);
    options.probe_cursor &= guard.is_active();

    let session = thread::Builder::new()
        .name("editor".to_string())
        .spawn({
            let console = console.clone();
            let client = Arc::clone(&client);
            let stop = Arc::clone(&stop);
            move || {
                let mut editor = LineEditor::new(
                    console,
                    prompt,
                    input,
                    Box::new(SystemClipboard::new()),
                    options,
                );
                editor.run(client.as_ref(), &stop)
            }
        })
        .context("failed to start the editor thread")?;

    let result = match session.join() {
        Ok(result) => result,
        Err(_) => {
            client.shutdown();
            client.join();
            guard.release();
            anyhow::bail!("editor thread panicked");
        }
    };

    client.join();
    guard.release();

    match result {
        Ok(()) => {
            info!("botconsole exiting");
            Ok(())
        }
        Err(SessionError::Interrupted) => std::process::exit(EXIT_INTERRUPTED),
    }
}
