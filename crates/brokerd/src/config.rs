//! Startup configuration for the broker daemon.
//!
//! Settings come from three layers, highest precedence first:
//! command-line flags, a TOML config file, built-in defaults.
//!
//! ```toml
//! capacity = 10
//! port = 8080
//! max_clients = 10
//! report_interval_secs = 5
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default maximum number of simultaneously connected clients.
pub const DEFAULT_MAX_CLIENTS: usize = 10;

/// Default status report period in seconds.
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 5;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "BROKER_CONFIG";

/// Validated daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrokerConfig {
    /// Total units in the pool at startup
    pub capacity: u64,
    pub bind_address: IpAddr,
    pub port: u16,
    pub max_clients: usize,
    pub report_interval_secs: u64,
}

impl BrokerConfig {
    /// Creates a config with the given capacity and default everything else.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            report_interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
        }
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Status report period.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Checks every field is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity", "must be a positive integer"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("port", "must be between 1 and 65535"));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::invalid("max_clients", "must be at least 1"));
        }
        if self.report_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "report_interval_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// One configuration layer, every field optional.
///
/// Deserialized from the config file and built from command-line flags,
/// then merged with [`ConfigOverrides::or`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub capacity: Option<u64>,
    pub bind_address: Option<IpAddr>,
    pub port: Option<u16>,
    pub max_clients: Option<usize>,
    pub report_interval_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Parses a TOML document.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&source)
    }

    /// Fills fields missing from `self` with those of `fallback`.
    #[must_use]
    pub fn or(self, fallback: ConfigOverrides) -> Self {
        Self {
            capacity: self.capacity.or(fallback.capacity),
            bind_address: self.bind_address.or(fallback.bind_address),
            port: self.port.or(fallback.port),
            max_clients: self.max_clients.or(fallback.max_clients),
            report_interval_secs: self.report_interval_secs.or(fallback.report_interval_secs),
        }
    }

    /// Applies defaults and validates.
    pub fn resolve(self) -> Result<BrokerConfig, ConfigError> {
        let capacity = self.capacity.ok_or(ConfigError::MissingCapacity)?;
        let defaults = BrokerConfig::with_capacity(capacity);

        let config = BrokerConfig {
            capacity,
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            port: self.port.unwrap_or(defaults.port),
            max_clients: self.max_clients.unwrap_or(defaults.max_clients),
            report_interval_secs: self
                .report_interval_secs
                .unwrap_or(defaults.report_interval_secs),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Errors raised while loading configuration. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("No pool capacity given (pass CAPACITY or set `capacity` in the config file)")]
    MissingCapacity,

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        ConfigError::Invalid { field, reason }
    }
}
