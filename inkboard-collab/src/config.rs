//! Server and client configuration.
//!
//! `ServerConfig::from_env` reads an optional `.env` file, then
//! `INKBOARD_*` variables:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `INKBOARD_BIND_ADDR` | `127.0.0.1:9100` |
//! | `INKBOARD_BROADCAST_CAPACITY` | `256` |
//! | `INKBOARD_FLUSH_INTERVAL_SECS` | `60` |
//! | `INKBOARD_EVICTION_GRACE_SECS` | `30` |
//! | `INKBOARD_STORAGE_PATH` | unset (in-memory) |
//! | `INKBOARD_CREATE_MISSING_BOARDS` | `false` |
//! | `INKBOARD_LOG_LEVEL` | `info` |

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::SessionConfig;

const ENV_PREFIX: &str = "INKBOARD_";

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Broadcast channel capacity per board topic
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Delay between the last collaborator leaving and eviction
    #[serde(default = "default_eviction_grace_secs")]
    pub eviction_grace_secs: u64,
    /// RocksDB path (None = in-memory only)
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    /// Create an empty board when a join names an unknown slug
    #[serde(default)]
    pub create_missing_boards: bool,
    /// Default `env_logger` filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            broadcast_capacity: default_broadcast_capacity(),
            flush_interval_secs: default_flush_interval_secs(),
            eviction_grace_secs: default_eviction_grace_secs(),
            storage_path: None,
            create_missing_boards: false,
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// Load from `.env` (if present) and `INKBOARD_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                log::warn!("Ignoring unreadable .env file: {e}");
            }
        }
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        log::debug!("Configuration loaded: {config:?}");
        Ok(config)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            flush_interval: Duration::from_secs(self.flush_interval_secs.max(1)),
            eviction_grace: Duration::from_secs(self.eviction_grace_secs),
            broadcast_capacity: self.broadcast_capacity,
            ..SessionConfig::default()
        }
    }
}

/// Client timing configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Quiet period before buffered local edits are sent
    pub delta_debounce: Duration,
    /// Minimum spacing between pointer frames
    pub pointer_throttle: Duration,
    /// Capacity of the event channel handed to the application
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            delta_debounce: Duration::from_millis(50),
            pointer_throttle: Duration::from_millis(30),
            event_capacity: 256,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Env(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Env(e) => write!(f, "Environment variable error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<envy::Error> for ConfigError {
    fn from(e: envy::Error) -> Self {
        ConfigError::Env(e)
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:9100".to_string()
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_flush_interval_secs() -> u64 {
    60
}

fn default_eviction_grace_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}
