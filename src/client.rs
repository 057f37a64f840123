//! Collaborator boundary
//!
//! The editor hands finished lines to a [`Collaborator`] (normally the
//! protocol client) and waits on its [`WaitHandle`]s for the message of the
//! day and for each command's response. [`DemoClient`] is a stand-in that
//! echoes commands and produces background output on its own threads, the
//! way a connected client would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::console::{Console, Source, Stream};
use crate::term::ansi::{NamedColor, Paint};

/// Resettable event another thread can wait on with a timeout
#[derive(Clone, Default)]
pub struct WaitHandle {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl WaitHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn clear(&self) {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    #[cfg(test)]
    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until set or `timeout` passes. Returns whether it was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Consumer of submitted lines
pub trait Collaborator: Send + Sync {
    /// Set once the message of the day has been printed
    fn motd_handle(&self) -> Option<WaitHandle> {
        None
    }

    /// Set when the last submitted command has been answered
    fn response_handle(&self) -> Option<WaitHandle> {
        None
    }

    /// Whether the session should wait for a response before the first
    /// prompt (for example while a room is being joined)
    fn awaits_initial_response(&self) -> bool {
        false
    }

    /// Called once per completed, non-empty line
    fn on_line_submitted(&self, line: &str);

    /// Stop the collaborator
    fn shutdown(&self);
}

/// Settings for the demo client
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Period of background events (zero disables them)
    pub event_interval: Duration,
    /// Room to join at startup
    pub room: Option<String>,
}

/// Stand-in protocol client
pub struct DemoClient {
    console: Console,
    motd: WaitHandle,
    response: WaitHandle,
    running: Arc<AtomicBool>,
    events_enabled: Arc<AtomicBool>,
    room: Option<String>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

const MOTD: [&str; 3] = [
    "Welcome to botconsole.",
    "Background events and log records appear above the prompt while you type.",
    "Type 'help' for demo commands, !q to quit.",
];

const HELP: [&str; 6] = [
    "help              show this help",
    "colors            print the color palette",
    "colors on|off     enable or disable colored output",
    "colors <name>     print a line in one color",
    "events on|off     pause or resume background events",
    "anything else     is sent to the bot as a command",
];

/// Sleep up to `total`, returning early (false) once `running` is cleared
fn sleep_while_running(running: &AtomicBool, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
    false
}

impl DemoClient {
    /// Create the client and start its background threads
    pub fn start(console: Console, options: DemoOptions) -> Arc<Self> {
        let client = Arc::new(Self {
            console,
            motd: WaitHandle::new(),
            response: WaitHandle::new(),
            running: Arc::new(AtomicBool::new(true)),
            events_enabled: Arc::new(AtomicBool::new(true)),
            room: options.room.clone(),
            workers: Mutex::new(Vec::new()),
        });

        let mut workers = Vec::new();
        workers.push(client.spawn("motd", {
            let client = Arc::clone(&client);
            move || client.greet()
        }));

        if !options.event_interval.is_zero() {
            let interval = options.event_interval;
            workers.push(client.spawn("events", {
                let console = client.console.clone();
                let running = Arc::clone(&client.running);
                let enabled = Arc::clone(&client.events_enabled);
                move || {
                    let mut n = 0u64;
                    while sleep_while_running(&running, interval) {
                        if enabled.load(Ordering::SeqCst) {
                            n += 1;
                            console.notify_event(
                                &format!("[event] heartbeat #{}", n),
                                Some(NamedColor::Cyan),
                            );
                        }
                    }
                }
            }));

            workers.push(client.spawn("fetch", {
                let running = Arc::clone(&client.running);
                let enabled = Arc::clone(&client.events_enabled);
                move || {
                    let mut total = 0u64;
                    while sleep_while_running(&running, interval * 3) {
                        if enabled.load(Ordering::SeqCst) {
                            total += 7;
                            info!(target: "fetch", "refreshed 7 records ({} total)", total);
                        }
                    }
                }
            }));
        }

        *client.workers.lock().unwrap_or_else(|e| e.into_inner()) =
            workers.into_iter().flatten().collect();
        client
    }

    fn spawn(&self, name: &str, f: impl FnOnce() + Send + 'static) -> Option<JoinHandle<()>> {
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("failed to start {} thread: {}", name, e);
                None
            }
        }
    }

    fn greet(&self) {
        if !sleep_while_running(&self.running, Duration::from_millis(200)) {
            return;
        }
        {
            let mut w = self.console.batch(Stream::Stdout, Source::Output);
            for line in MOTD {
                w.write_line(&Paint::fg(NamedColor::Green).apply(line));
            }
        }
        self.motd.set();

        if let Some(room) = &self.room {
            if sleep_while_running(&self.running, Duration::from_millis(300)) {
                self.console
                    .notify_event(&format!("joined {}", room), Some(NamedColor::Yellow));
                self.response.set();
            }
        }
    }

    fn print_palette(&self) {
        let mut w = self.console.batch(Stream::Stdout, Source::Output);
        for color in NamedColor::ALL {
            let swatch = Paint::NONE.on(color).apply("    ");
            let label = Paint::fg(color).apply(&format!("{:>3} {}", color.index(), color));
            w.write_line(&format!("{} {}", swatch, label));
        }
    }

    fn print_sample(&self, name: &str) {
        match name.parse::<NamedColor>() {
            Ok(color) => self
                .console
                .notify_event(&format!("this line is {}", color), Some(color)),
            Err(e) => self.console.write_line(Stream::Stdout, &e.to_string()),
        }
    }

    /// Wait for the background threads to finish
    pub fn join(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for worker in workers {
            if worker.join().is_err() {
                warn!("demo worker panicked");
            }
        }
    }
}

impl Collaborator for DemoClient {
    fn motd_handle(&self) -> Option<WaitHandle> {
        Some(self.motd.clone())
    }

    fn response_handle(&self) -> Option<WaitHandle> {
        Some(self.response.clone())
    }

    fn awaits_initial_response(&self) -> bool {
        self.room.is_some()
    }

    fn on_line_submitted(&self, line: &str) {
        debug!("command: {}", line);
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (Some("help"), None, _) => {
                let mut w = self.console.batch(Stream::Stdout, Source::Output);
                for line in HELP {
                    w.write_line(line);
                }
            }
            (Some("colors"), None, _) => self.print_palette(),
            (Some("colors"), Some(arg @ ("on" | "off")), None) => {
                self.console.set_colors_enabled(arg == "on");
                self.console.write_line(Stream::Stdout, &format!("colors {}", arg));
            }
            (Some("colors"), Some(name), None) => self.print_sample(name),
            (Some("events"), Some(arg @ ("on" | "off")), None) => {
                self.events_enabled.store(arg == "on", Ordering::SeqCst);
                self.console.write_line(Stream::Stdout, &format!("events {}", arg));
            }
            _ => self
                .console
                .write_line(Stream::Stdout, &format!("DemoClient send_bot_command: '{}'", line)),
        }
        self.response.set();
    }

    fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.console.write_line(Stream::Stdout, "DemoClient shutdown");
        }
        self.motd.set();
        self.response.set();
    }
}
