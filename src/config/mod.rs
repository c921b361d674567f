//! Configuration module for sshelf.
//!
//! Handles loading and parsing the .sshelfrc configuration file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::logging::LogConfig;
use crate::session::RelayMode;
use crate::ssh::{DEFAULT_CONNECT_TIMEOUT, KnownHosts};

/// Default .sshelfrc file content with all settings documented.
const DEFAULT_SSHELFRC: &str = r#"# sshelf Configuration File
# ==========================
# This file is read on startup.
# Lines starting with '#' are comments.
#
# Profile Storage
# ---------------
# SQLite database holding saved SSH server profiles.
# database = ~/.sshelf/servers.db

# Reject profiles that carry both a password and a private key path.
# When false (default), the password is used and the key is ignored.
# strict_credentials = false

# Connecting
# ----------
# Seconds allowed for TCP connect, handshake and authentication.
# connect_timeout = 10

# Known-hosts file used for trust-on-first-use host key checks.
# known_hosts = ~/.ssh/known_hosts

# Interactive Sessions
# --------------------
# Relay mode: auto, multiplexed, or threaded
# auto uses multiplexed on Unix when stdin is a terminal, threaded otherwise.
# relay_mode = auto

# Terminal type requested for the remote PTY.
# term = xterm-256color

# Logging Configuration
# ---------------------
# Logs are stored in ~/.sshelf/logs/ with automatic cleanup.
#
# log_enabled = true       # Enable/disable file logging (true/false)
# log_level = info         # Log level: trace, debug, info, warn, error, off
# log_retention = 24       # Hours to keep log files (default: 24)
"#;

/// Default terminal type for remote PTYs.
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to config file.
    pub config_path: PathBuf,
    /// Profile database path.
    pub database: PathBuf,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Known-hosts file.
    pub known_hosts: PathBuf,
    /// Relay mode.
    pub relay_mode: RelayMode,
    /// Reject profiles with both credentials.
    pub strict_credentials: bool,
    /// Remote terminal type.
    pub term: String,
    /// Logging configuration.
    pub log_config: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            database: Self::default_database_path(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            known_hosts: KnownHosts::default_path(),
            relay_mode: RelayMode::Auto,
            strict_credentials: false,
            term: DEFAULT_TERM.to_string(),
            log_config: LogConfig::default(),
        }
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expands a leading `~` to the home directory.
fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None if value == "~" => home(),
        None => PathBuf::from(value),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1" | "on")
}

impl Config {
    /// Returns the default config file path (~/.sshelfrc).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        home().join(".sshelfrc")
    }

    /// Returns the default database path (~/.sshelf/servers.db).
    #[must_use]
    pub fn default_database_path() -> PathBuf {
        home().join(".sshelf").join("servers.db")
    }

    /// Loads configuration from the default path, creating it if it doesn't exist.
    ///
    /// # Errors
    /// Returns error if config cannot be read or created.
    pub fn load() -> io::Result<Self> {
        Self::load_from(&Self::default_config_path())
    }

    /// Loads configuration from a specific path.
    ///
    /// # Errors
    /// Returns error if config cannot be read or created.
    pub fn load_from(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            Self::create_default_config(path)?;
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self {
            config_path: path.to_path_buf(),
            ..Self::default()
        };
        config.parse(&content);
        Ok(config)
    }

    /// Creates the default config file.
    fn create_default_config(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_SSHELFRC.as_bytes())?;
        Ok(())
    }

    /// Parses config file content, applying each recognized setting.
    pub fn parse(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                // Remove inline comments
                let value = value.split('#').next().unwrap_or(value).trim();

                self.apply_setting(key, value);
            }
        }
    }

    /// Applies a single setting. Unknown keys and unparsable values are ignored.
    fn apply_setting(&mut self, key: &str, value: &str) {
        match key {
            "database" | "db" => {
                if !value.is_empty() {
                    self.database = expand_home(value);
                }
            }
            "connect_timeout" => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => self.connect_timeout = Duration::from_secs(secs),
                _ => debug!("Ignoring connect_timeout = {:?}", value),
            },
            "known_hosts" => {
                if !value.is_empty() {
                    self.known_hosts = expand_home(value);
                }
            }
            "relay_mode" => {
                self.relay_mode = RelayMode::parse(value);
            }
            "strict_credentials" => {
                self.strict_credentials = parse_bool(value);
            }
            "term" => {
                if !value.is_empty() {
                    self.term = value.to_string();
                }
            }
            "log_level" => {
                self.log_config.level = LogConfig::parse_level(value);
            }
            "log_retention" | "log_retention_hours" => {
                self.log_config.retention_hours = LogConfig::parse_retention(value);
            }
            "log_enabled" | "logging" => {
                self.log_config.enabled = parse_bool(value);
            }
            _ => {}
        }
    }

    /// Returns the known-hosts policy for this configuration.
    #[must_use]
    pub fn known_hosts(&self) -> KnownHosts {
        KnownHosts::new(self.known_hosts.clone())
    }
}
