//! Configuration management for the Skiff daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/skiff/config.toml`.

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::MIN_ITERATIONS;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bind_addr is not a valid IP address: {0}")]
    InvalidBindAddr(String),

    #[error("port must not be 0")]
    InvalidPort,

    #[error("pbkdf2_iterations must be at least {MIN_ITERATIONS}, got {0}")]
    InvalidIterations(u32),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Skiff daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listen socket configuration.
    pub server: ServerConfig,

    /// Storage locations.
    pub storage: StorageConfig,

    /// Authentication settings.
    pub auth: AuthConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Listen socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind_addr: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Close connections idle for this many seconds (0 = never).
    pub idle_timeout_secs: u64,
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the user database.
    pub db_path: PathBuf,

    /// Directory under which per-user homes are provisioned by default.
    pub homes_root: PathBuf,
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// PBKDF2 work factor for password digests.
    pub pbkdf2_iterations: u32,

    /// Close a connection after this many failed logins (0 = unlimited).
    pub max_login_failures: u32,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: protocol::DEFAULT_PORT,
            idle_timeout_secs: 0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            db_path: data_dir.join("users.db"),
            homes_root: data_dir.join("homes"),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: crate::auth::DEFAULT_ITERATIONS,
            max_login_failures: 0,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skiff")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("skiff")
}

impl Config {
    /// Load configuration from a specific file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, falling back to defaults
    /// if no file exists there.
    pub fn load_default() -> Result<Self> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SKIFF_PORT: Override the listen port
    /// - SKIFF_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("SKIFF_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                tracing::info!("Overriding port from environment: {}", port);
                self.server.port = port;
            }
        }

        if let Ok(level) = std::env::var("SKIFF_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_addr.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddr(self.server.bind_addr.clone()));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        // Weak digests are a provisioning hazard, not a runtime choice.
        if self.auth.pbkdf2_iterations < MIN_ITERATIONS {
            return Err(ConfigError::InvalidIterations(self.auth.pbkdf2_iterations));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// The socket address the server should bind.
    ///
    /// Call [`Config::validate`] first; an invalid `bind_addr` panics here.
    pub fn socket_addr(&self) -> SocketAddr {
        let ip: IpAddr = self
            .server
            .bind_addr
            .parse()
            .unwrap_or_else(|_| panic!("bind_addr validated earlier: {}", self.server.bind_addr));
        SocketAddr::new(ip, self.server.port)
    }

    /// Idle timeout as a `Duration`, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        match self.server.idle_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(secs)),
        }
    }
}
