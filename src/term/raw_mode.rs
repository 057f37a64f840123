//! Raw terminal input mode
//!
//! [`RawTerminal`] hides the platform: termios on POSIX systems, console
//! mode flags on Windows. [`RawModeGuard`] restores the saved mode when it is
//! released or dropped, and [`install_panic_hook`] covers panics.

use std::io;

use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum RawModeError {
    #[error("failed to read terminal mode: {0}")]
    Capture(#[source] io::Error),
    #[error("failed to set raw mode: {0}")]
    Apply(#[source] io::Error),
    #[error("failed to restore terminal mode: {0}")]
    Restore(#[source] io::Error),
}

/// Platform raw-mode switch
pub trait RawTerminal: Send + Sync {
    /// Save the current mode and switch to raw input.
    ///
    /// Returns `Ok(false)` when the input is not a terminal.
    fn enter(&self) -> Result<bool, RawModeError>;

    /// Restore the saved mode. Does nothing when nothing was saved.
    fn restore(&self) -> Result<(), RawModeError>;
}

#[cfg(unix)]
mod posix {
    use std::io;
    use std::sync::Mutex;

    use rustix::termios::{self, LocalModes, OptionalActions, SpecialCodeIndex, Termios};

    use super::{RawModeError, RawTerminal};

    /// termios based raw mode on stdin
    pub struct PosixTerminal {
        saved: Mutex<Option<Termios>>,
    }

    impl PosixTerminal {
        pub const fn new() -> Self {
            Self { saved: Mutex::new(None) }
        }
    }

    impl RawTerminal for PosixTerminal {
        fn enter(&self) -> Result<bool, RawModeError> {
            let stdin = io::stdin();
            if !termios::isatty(&stdin) {
                return Ok(false);
            }

            let original = termios::tcgetattr(&stdin)
                .map_err(|e| RawModeError::Capture(e.into()))?;

            let mut raw = original.clone();
            // Keystrokes arrive unbuffered and unechoed; Ctrl+C is read as a byte
            raw.local_modes
                .remove(LocalModes::ICANON | LocalModes::ECHO | LocalModes::ISIG);
            raw.special_codes[SpecialCodeIndex::VMIN] = 1;
            raw.special_codes[SpecialCodeIndex::VTIME] = 0;

            let mut saved = self.saved.lock().unwrap_or_else(|e| e.into_inner());
            if saved.is_none() {
                *saved = Some(original);
            }
            termios::tcsetattr(&stdin, OptionalActions::Now, &raw)
                .map_err(|e| RawModeError::Apply(e.into()))?;
            Ok(true)
        }

        fn restore(&self) -> Result<(), RawModeError> {
            let saved = self.saved.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(original) = saved {
                termios::tcsetattr(&io::stdin(), OptionalActions::Now, &original)
                    .map_err(|e| RawModeError::Restore(e.into()))?;
            }
            Ok(())
        }
    }
}

#[cfg(windows)]
mod windows_console {
    use std::io;
    use std::sync::Mutex;

    use windows::Win32::System::Console::{
        GetConsoleMode, GetStdHandle, SetConsoleMode, CONSOLE_MODE, ENABLE_PROCESSED_OUTPUT,
        ENABLE_VIRTUAL_TERMINAL_INPUT, ENABLE_VIRTUAL_TERMINAL_PROCESSING,
        ENABLE_WRAP_AT_EOL_OUTPUT, STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
    };

    use super::{RawModeError, RawTerminal};

    fn win_err(e: windows::core::Error) -> io::Error {
        io::Error::new(io::ErrorKind::Other, e.to_string())
    }

    fn get_mode(which: STD_HANDLE) -> io::Result<u32> {
        unsafe {
            let handle = GetStdHandle(which).map_err(win_err)?;
            let mut mode = CONSOLE_MODE(0);
            GetConsoleMode(handle, &mut mode).map_err(win_err)?;
            Ok(mode.0)
        }
    }

    fn set_mode(which: STD_HANDLE, mode: u32) -> io::Result<()> {
        unsafe {
            let handle = GetStdHandle(which).map_err(win_err)?;
            SetConsoleMode(handle, CONSOLE_MODE(mode)).map_err(win_err)
        }
    }

    /// Console-mode based raw mode. Only the mode values are kept, handles
    /// are looked up again on every call.
    pub struct WindowsConsole {
        saved: Mutex<Option<(u32, u32)>>,
    }

    impl WindowsConsole {
        pub const fn new() -> Self {
            Self { saved: Mutex::new(None) }
        }
    }

    impl RawTerminal for WindowsConsole {
        fn enter(&self) -> Result<bool, RawModeError> {
            // Not a console (redirected): nothing to do
            let input = match get_mode(STD_INPUT_HANDLE) {
                Ok(mode) => mode,
                Err(_) => return Ok(false),
            };
            let output = get_mode(STD_OUTPUT_HANDLE).map_err(RawModeError::Capture)?;

            {
                let mut saved = self.saved.lock().unwrap_or_else(|e| e.into_inner());
                if saved.is_none() {
                    *saved = Some((input, output));
                }
            }

            // VT input only: no line input, no echo, no processed Ctrl+C
            set_mode(STD_INPUT_HANDLE, ENABLE_VIRTUAL_TERMINAL_INPUT.0)
                .map_err(RawModeError::Apply)?;
            set_mode(
                STD_OUTPUT_HANDLE,
                ENABLE_PROCESSED_OUTPUT.0
                    | ENABLE_WRAP_AT_EOL_OUTPUT.0
                    | ENABLE_VIRTUAL_TERMINAL_PROCESSING.0,
            )
            .map_err(RawModeError::Apply)?;
            Ok(true)
        }

        fn restore(&self) -> Result<(), RawModeError> {
            let saved = self.saved.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some((input, output)) = saved {
                set_mode(STD_INPUT_HANDLE, input).map_err(RawModeError::Restore)?;
                set_mode(STD_OUTPUT_HANDLE, output).map_err(RawModeError::Restore)?;
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
pub use posix::PosixTerminal;
#[cfg(windows)]
pub use windows_console::WindowsConsole;

#[cfg(unix)]
static PLATFORM: PosixTerminal = PosixTerminal::new();
#[cfg(windows)]
static PLATFORM: WindowsConsole = WindowsConsole::new();

/// The raw-mode implementation for this platform
pub fn platform() -> &'static dyn RawTerminal {
    &PLATFORM
}

/// Scoped raw mode. Restores the terminal when released or dropped.
pub struct RawModeGuard {
    term: &'static dyn RawTerminal,
    active: bool,
}

/// Switch `term` to raw mode.
///
/// Never fails: when the input is not a terminal, or switching fails, the
/// returned guard is inactive and the program keeps running without raw
/// input.
pub fn acquire(term: &'static dyn RawTerminal) -> RawModeGuard {
    let active = match term.enter() {
        Ok(true) => true,
        Ok(false) => {
            debug!("stdin is not a terminal, raw mode skipped");
            false
        }
        Err(e) => {
            warn!("{}", e);
            // a partially applied mode is rolled back
            let _ = term.restore();
            false
        }
    };
    RawModeGuard { term, active }
}

impl RawModeGuard {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Restore the terminal. Safe to call more than once.
    pub fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.term.restore() {
            warn!("{}", e);
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Restore the platform terminal mode, for exit paths that bypass the guard.
pub fn try_restore() {
    if let Err(e) = platform().restore() {
        warn!("{}", e);
    }
}

/// Restore the terminal before the default panic message is printed.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        try_restore();
        previous(info);
    }));
}
