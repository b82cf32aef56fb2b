//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `RBUI_PORT`, `RBUI_LOG_DEBUG`,
//!    `RBUI_LOG_MSG`
//! 2. **Config file** — path via `--config <path>`, or `rbui.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//!
//! [log]
//! debug = "~/rockblock_debug.log"
//! message = "~/rockblock_messages.log"
//!
//! [recv]
//! poll_interval_secs = 10
//! ```

use std::borrow::Cow;
use std::path::Path;

use serde::Deserialize;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub recv: RecvConfig,
}

/// Serial device settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    /// Device path (default `/dev/ttyUSB0`). Override with `RBUI_PORT`.
    #[serde(default = "default_port")]
    pub port: String,
}

/// Log file locations. Tildes are expanded on load.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Wire-level debug log (default `~/rockblock_debug.log`).
    /// Override with `RBUI_LOG_DEBUG`.
    #[serde(default = "default_debug_log")]
    pub debug: String,
    /// Durable message log (default `~/rockblock_messages.log`).
    /// Override with `RBUI_LOG_MSG`.
    #[serde(default = "default_message_log")]
    pub message: String,
}

/// Settings for the `recv` poll loop.
#[derive(Debug, Clone, Deserialize)]
pub struct RecvConfig {
    /// Seconds between mailbox polls (default 10).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}
fn default_debug_log() -> String {
    "~/rockblock_debug.log".to_string()
}
fn default_message_log() -> String {
    "~/rockblock_messages.log".to_string()
}
fn default_poll_interval() -> u64 {
    10
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: default_debug_log(),
            message: default_message_log(),
        }
    }
}

impl Default for RecvConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file >
    /// defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise
    /// looks for `rbui.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("rbui.toml").exists() {
            let content = std::fs::read_to_string("rbui.toml").expect("Failed to read rbui.toml");
            toml::from_str(&content).expect("Failed to parse rbui.toml")
        } else {
            Config {
                serial: SerialConfig::default(),
                log: LogConfig::default(),
                recv: RecvConfig::default(),
            }
        };

        // Env var overrides
        if let Ok(port) = std::env::var("RBUI_PORT") {
            config.serial.port = port;
        }
        if let Ok(debug) = std::env::var("RBUI_LOG_DEBUG") {
            config.log.debug = debug;
        }
        if let Ok(message) = std::env::var("RBUI_LOG_MSG") {
            config.log.message = message;
        }

        config.log.debug = expand_tilde(&config.log.debug).into_owned();
        config.log.message = expand_tilde(&config.log.message).into_owned();

        config
    }
}

/// Expand a leading `~` to `$HOME`.
///
/// - `"~"` → `"/home/user"`
/// - `"~/foo"` → `"/home/user/foo"`
/// - Anything else passes through unchanged.
pub fn expand_tilde(path: &str) -> Cow<'_, str> {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            if path == "~" {
                return Cow::Owned(home);
            }
            return Cow::Owned(format!("{}{}", home, &path[1..]));
        }
    }
    Cow::Borrowed(path)
}
