//! Configuration management for Syncboard.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/syncboard/config.toml` |
//! | macOS | `~/Library/Application Support/com.syncboard.Syncboard/config.toml` |
//! | Windows | `%APPDATA%\syncboard\Syncboard\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use syncboard_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Listening on port {}", config.network.port);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Syncboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Network settings
    pub network: NetworkConfig,
    /// Session settings
    pub session: SessionConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Alias this device suggests for itself
    pub alias: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            alias: "syncboard".to_string(),
        }
    }
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Listening port (TCP)
    pub port: u16,
    /// Bounded wait used by the accept and readiness checks
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Bytes requested per socket read
    pub recv_buffer_size: usize,
    /// Give up on an outbound connect after this long
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Give up on a write to a peer that stops reading
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    /// Largest accepted frame payload
    pub max_payload_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            poll_interval: Duration::from_millis(crate::DEFAULT_POLL_INTERVAL_MS),
            recv_buffer_size: crate::DEFAULT_RECV_SIZE,
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
            max_payload_size: crate::protocol::MAX_PAYLOAD_SIZE,
        }
    }
}

/// Session configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Save the connection list between runs
    pub persist_connections: bool,
    /// Where the connection list lives (None = data directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections_file: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist_connections: true,
            connections_file: None,
        }
    }
}

impl SessionConfig {
    /// Resolve the connection list path, falling back to the data directory.
    #[must_use]
    pub fn connections_path(&self) -> PathBuf {
        self.connections_file.clone().unwrap_or_else(|| {
            project_dirs().map_or_else(
                || PathBuf::from("connections.json"),
                |dirs| dirs.data_dir().join("connections.json"),
            )
        })
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(&path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "syncboard", "Syncboard")
}

/// Durations as `"500us"`, `"200ms"`, `"5s"` or `"2m"`.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else if duration.subsec_nanos() % 1_000_000 == 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            // Finer than microseconds is truncated
            serializer.serialize_str(&format!("{}us", duration.as_micros()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix("us").map(|micros| {
                    micros
                        .parse()
                        .map(Duration::from_micros)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
