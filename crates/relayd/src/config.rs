//! Daemon configuration.
//!
//! Values are layered, later sources winning:
//! 1. Built-in defaults
//! 2. A TOML file (`--config` or `RELAY_CONFIG`)
//! 3. Environment overrides (`RELAY_LISTEN`, `RELAY_MODE`, `RELAY_STORE`,
//!    `RELAY_DATABASE`)
//! 4. Command-line flags, applied by the binary
//!
//! Call [`RelayConfig::validate`] once every layer is applied.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use axum::http::HeaderValue;
use relay_core::RoutingMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:12345";

/// Default per-connection outbound mailbox size.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Which message store backs the history endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// No persistence; history endpoints answer 503
    None,
    #[default]
    Memory,
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::InvalidValue {
                key: "store",
                value: other.to_string(),
            }),
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub listen: SocketAddr,

    /// Routing mode, fixed for the daemon's lifetime
    pub mode: RoutingMode,

    /// Outbound mailbox size per connection
    pub mailbox_capacity: usize,

    /// Hub request queue size
    pub command_buffer: usize,

    /// Persistence queue size
    pub recorder_capacity: usize,

    /// CORS origins; `"*"` allows any
    pub allowed_origins: Vec<String>,

    pub store: StoreKind,

    /// SQLite file, required when `store = "sqlite"`
    pub database_path: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 12345)),
            mode: RoutingMode::Direct,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            command_buffer: crate::hub::DEFAULT_COMMAND_BUFFER,
            recorder_capacity: crate::store::DEFAULT_RECORDER_CAPACITY,
            allowed_origins: vec!["*".to_string()],
            store: StoreKind::Memory,
            database_path: None,
        }
    }
}

impl RelayConfig {
    /// Load defaults, the optional file and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// environment override has an invalid value.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load from a TOML file. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML, unknown keys or bad values.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `RELAY_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a set variable has an invalid value.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` in place of the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a found value is invalid.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("RELAY_LISTEN") {
            self.listen = parse_listen(&listen)?;
        }

        if let Some(mode) = lookup("RELAY_MODE") {
            self.mode = parse_mode(&mode)?;
        }

        if let Some(store) = lookup("RELAY_STORE") {
            self.store = store.parse()?;
        }

        // A database path on its own selects sqlite
        if let Some(path) = lookup("RELAY_DATABASE").filter(|p| !p.trim().is_empty()) {
            self.database_path = Some(PathBuf::from(path));
            self.store = StoreKind::Sqlite;
        }

        Ok(())
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("mailbox_capacity", self.mailbox_capacity),
            ("command_buffer", self.command_buffer),
            ("recorder_capacity", self.recorder_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroCapacity(name));
            }
        }

        if self.store == StoreKind::Sqlite && self.database_path.is_none() {
            return Err(ConfigError::MissingDatabasePath);
        }

        if self.allowed_origins.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "allowed_origins",
                value: "[]".to_string(),
            });
        }

        for origin in &self.allowed_origins {
            if origin != "*" && HeaderValue::from_str(origin).is_err() {
                return Err(ConfigError::InvalidValue {
                    key: "allowed_origins",
                    value: origin.clone(),
                });
            }
        }

        Ok(())
    }

    /// True if any origin may call the HTTP endpoints.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

/// Parse a listen address, accepting a bare port as `0.0.0.0:<port>`.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` if `raw` is neither.
pub fn parse_listen(raw: &str) -> Result<SocketAddr, ConfigError> {
    let raw = raw.trim();
    if let Ok(port) = raw.parse::<u16>() {
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: "listen",
        value: raw.to_string(),
    })
}

/// Parse a routing mode name.
///
/// # Errors
///
/// Returns `ConfigError::InvalidValue` for unknown modes.
pub fn parse_mode(raw: &str) -> Result<RoutingMode, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: "mode",
        value: raw.trim().to_string(),
    })
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),

    #[error("store = \"sqlite\" requires database_path")]
    MissingDatabasePath,
}
