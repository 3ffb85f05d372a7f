//! Daemon configuration.
//!
//! Layering, lowest to highest precedence: built-in defaults, the TOML
//! file, environment variables (`UDPFLEET_BIND`, `UDPFLEET_PORT`), then
//! command-line flags applied by the binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::DEFAULT_NOTIFY_BUFFER;

/// Default discovery server port.
pub const DEFAULT_PORT: u16 = 18000;

/// Environment variable overriding the bind address.
pub const ENV_BIND: &str = "UDPFLEET_BIND";

/// Environment variable overriding the port.
pub const ENV_PORT: &str = "UDPFLEET_PORT";

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Address the discovery server binds to
    pub bind_address: IpAddr,

    /// TCP port the discovery server listens on
    pub port: u16,

    /// Capacity of each registry notification channel (>= 1).
    /// A full channel blocks registry mutations; nothing is dropped.
    pub notify_buffer: usize,

    /// Maximum number of concurrent discovery streams
    pub max_subscribers: usize,

    /// Maximum size of one protocol message in bytes
    pub max_message_size: usize,

    /// Time a new connection has to complete the handshake
    pub handshake_timeout_secs: u64,

    /// Time allowed for writing one message to a peer
    pub write_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            notify_buffer: DEFAULT_NOTIFY_BUFFER,
            max_subscribers: 1024,
            max_message_size: 1_048_576,
            handshake_timeout_secs: 10,
            write_timeout_secs: 10,
        }
    }
}

impl DaemonConfig {
    /// Loads configuration from a TOML file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                error,
            },
            other => other,
        })
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: None,
            error: e.to_string(),
        })
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Loads `explicit` if given, else the default file if it exists,
    /// else built-in defaults. Environment overrides are applied on top.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `UDPFLEET_BIND` / `UDPFLEET_PORT` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(ENV_BIND) {
            self.bind_address = bind.trim().parse().map_err(|_| ConfigError::Env {
                key: ENV_BIND,
                value: bind.clone(),
            })?;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.trim().parse().map_err(|_| ConfigError::Env {
                key: ENV_PORT,
                value: port.clone(),
            })?;
        }
        Ok(())
    }

    /// Rejects values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notify_buffer == 0 {
            return Err(ConfigError::Invalid("notify_buffer must be at least 1".to_string()));
        }
        if self.max_subscribers == 0 {
            return Err(ConfigError::Invalid("max_subscribers must be at least 1".to_string()));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("max_message_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Socket address the discovery server listens on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// `$XDG_CONFIG_HOME/udpfleet/udpfleetd.toml` (or the platform equivalent).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("udpfleet").join("udpfleetd.toml"))
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {error}", path.display())]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config{}: {error}", path.as_ref().map(|p| format!(" {}", p.display())).unwrap_or_default())]
    Parse { path: Option<PathBuf>, error: String },

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
