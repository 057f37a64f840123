//! Configuration for botconsole.
//!
//! Settings are read from `~/.botconsole/config.toml`. Every field is
//! optional; anything missing takes its default:
//!
//! ```toml
//! # Global switch for SGR colors
//! enable_colors = true
//!
//! # Log level when RUST_LOG is not set: error, warn, info, debug, trace
//! log_level = "info"
//!
//! [history]
//! max_lines = 200        # 0 = unbounded
//!
//! [prompt]
//! label = ">> console (!q to quit)"
//! probe_cursor = true    # ask the terminal where the cursor is at startup
//!
//! [timeouts]
//! motd_secs = 3.0
//! response_secs = 5.0
//! cursor_query_ms = 300
//!
//! [demo]
//! event_interval_ms = 4000   # 0 disables background events
//! room = "#lobby"            # optional
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::editor::HISTORY_LIMIT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Emit SGR color sequences
    pub enable_colors: bool,
    /// Default log filter
    pub log_level: String,
    pub history: HistoryConfig,
    pub prompt: PromptConfig,
    pub timeouts: TimeoutConfig,
    pub demo: DemoConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_colors: true,
            log_level: "info".to_string(),
            history: HistoryConfig::default(),
            prompt: PromptConfig::default(),
            timeouts: TimeoutConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

/// Command history settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_lines: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_lines: HISTORY_LIMIT,
        }
    }
}

/// Prompt settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub label: String,
    pub probe_cursor: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            label: ">> console (!q to quit)".to_string(),
            probe_cursor: true,
        }
    }
}

/// How long the session waits for the collaborator and the terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub motd_secs: f64,
    pub response_secs: f64,
    pub cursor_query_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            motd_secs: 3.0,
            response_secs: 5.0,
            cursor_query_ms: 300,
        }
    }
}

/// Demo client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub event_interval_ms: u64,
    pub room: Option<String>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            event_interval_ms: 4000,
            room: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file gives the defaults; an unreadable or malformed one is
    /// an error, left to the caller to report once logging is up.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from `path`
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Directory holding the config and log files
    pub fn data_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".botconsole"))
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("config.toml"))
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
