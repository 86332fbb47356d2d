//! Client configuration.
//!
//! Settings come from three places, later ones winning:
//!
//! 1. Built-in defaults (socket at `/tmp/qga.sock`, 30s timeout, 100ms x 300 polls)
//! 2. The config file at `~/.config/qgactl/config.toml`, if present
//! 3. The `QGA_SOCKET` environment variable
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Configuration File
//!
//! ```toml
//! socket_path = "/run/qemu/vm1-qga.sock"
//! timeout = "30s"
//! followup_timeout = "250ms"
//! poll_interval = "100ms"
//! max_poll_retries = 300
//! max_message_size = 67108864
//! ```

use crate::error::{Error, Result};
use qga_protocol::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SOCKET_PATH};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the socket path.
pub const SOCKET_ENV: &str = "QGA_SOCKET";

/// Default wait for the first byte of a reply (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default socket write timeout (10 seconds).
/// Requests are small; a write that stalls this long means the channel is wedged.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for each further chunk once a reply has started (250ms).
pub const DEFAULT_FOLLOWUP_TIMEOUT: Duration = Duration::from_millis(250);

/// Default pause between exec status polls (100ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default exec status poll budget. With the default interval this caps a
/// wait at 30 seconds.
pub const DEFAULT_MAX_POLL_RETRIES: u32 = 300;

/// Settings for a guest agent client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Path of the guest agent Unix socket.
    pub socket_path: PathBuf,
    /// Wait for the first byte of each reply.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Socket write timeout.
    #[serde(with = "duration_str")]
    pub write_timeout: Duration,
    /// Wait for each further chunk once a reply has started arriving.
    /// Must be strictly shorter than `timeout`.
    #[serde(with = "duration_str")]
    pub followup_timeout: Duration,
    /// Largest reply, in bytes, that will be buffered.
    pub max_message_size: usize,
    /// Pause between exec status polls.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    /// Number of exec status polls before giving up.
    pub max_poll_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            followup_timeout: DEFAULT_FOLLOWUP_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_retries: DEFAULT_MAX_POLL_RETRIES,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given socket with default settings.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the default file and environment.
    ///
    /// A missing config file is not an error; defaults are used instead.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Some(path) => Self::load_from(&path)?,
            None => {
                tracing::debug!("could not determine config directory, using defaults");
                Self::default()
            }
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// Returns defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(
                path = %path.display(),
                "config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config("read", format!("{}: {}", path.display(), e)))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::config("parse", format!("{}: {}", path.display(), e)))?;

        tracing::debug!(
            path = %path.display(),
            socket = %config.socket_path.display(),
            "loaded client configuration"
        );

        Ok(config)
    }

    /// Path of the default config file (`~/.config/qgactl/config.toml`).
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("qgactl").join("config.toml"))
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Some(path) = std::env::var_os(SOCKET_ENV).filter(|p| !p.is_empty()) {
            self.socket_path = PathBuf::from(path);
        }
    }

    /// Check that the settings are usable together.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::config("validate", "timeout must be non-zero"));
        }
        if self.followup_timeout.is_zero() || self.followup_timeout >= self.timeout {
            return Err(Error::config(
                "validate",
                format!(
                    "followup_timeout ({}) must be non-zero and shorter than timeout ({})",
                    humantime::format_duration(self.followup_timeout),
                    humantime::format_duration(self.timeout)
                ),
            ));
        }
        if self.max_message_size == 0 {
            return Err(Error::config("validate", "max_message_size must be non-zero"));
        }
        if self.max_poll_retries == 0 {
            return Err(Error::config("validate", "max_poll_retries must be non-zero"));
        }
        Ok(())
    }

    /// Worst-case wait of an exec poll loop under these settings.
    pub fn max_exec_wait(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_poll_retries)
    }
}

/// Durations as humantime strings ("30s", "250ms") in the config file.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
