//! Configuration management
//!
//! Everything except the source connection comes from the environment (with
//! `.env` support); the source connection is taken from CLI flags, which fall
//! back to the `AUTOCARE_DB_*` variables.

use std::path::PathBuf;

use thiserror::Error;

use crate::assets::processor::DEFAULT_IMAGEMAGICK_PATH;
use crate::db::DbConfig;
use crate::tasks::{DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_LEASE_SECS};

// ============================================================================
// Defaults
// ============================================================================

/// Default media root for asset files.
pub const DEFAULT_MEDIA_ROOT: &str = "./media";

/// Default source database name.
pub const DEFAULT_SOURCE_DATABASE: &str = "pcadb";

/// Default source connection timeout in seconds.
pub const DEFAULT_SOURCE_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Longest accepted orphan lease (one year).
pub const MAX_LEASE_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Asset processing settings
#[derive(Debug, Clone)]
pub struct AssetConfig {
    pub imagemagick_path: PathBuf,
    pub media_root: PathBuf,
}

/// Task consumer settings
#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub heartbeat_interval_secs: u64,
    pub lease_secs: i64,
}

impl TaskConfig {
    /// Orphan lease, at least two heartbeats long and at most [`MAX_LEASE_SECS`]
    pub fn lease(&self) -> Result<chrono::Duration, ConfigError> {
        let invalid = |reason: String| ConfigError::invalid("TASK_LEASE_SECS", reason);

        if self.lease_secs <= 0 {
            return Err(invalid(format!("{} must be positive", self.lease_secs)));
        }
        if self.lease_secs > MAX_LEASE_SECS {
            return Err(invalid(format!(
                "{} exceeds the maximum of {}",
                self.lease_secs, MAX_LEASE_SECS
            )));
        }

        // A lease shorter than two heartbeats would expire healthy tasks
        let two_heartbeats = i64::try_from(self.heartbeat_interval_secs)
            .ok()
            .and_then(|secs| secs.checked_mul(2))
            .ok_or_else(|| ConfigError::invalid("TASK_HEARTBEAT_INTERVAL", "out of range"))?;
        if self.lease_secs < two_heartbeats {
            return Err(invalid(format!(
                "{} must be at least twice the heartbeat interval ({})",
                self.lease_secs, self.heartbeat_interval_secs
            )));
        }

        chrono::Duration::try_seconds(self.lease_secs)
            .ok_or_else(|| invalid(format!("{} is out of range", self.lease_secs)))
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub assets: AssetConfig,
    pub tasks: TaskConfig,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let database = DbConfig::from_env().map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let config = Config {
            database,
            assets: AssetConfig {
                imagemagick_path: std::env::var("IMAGEMAGICK_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_IMAGEMAGICK_PATH)),
                media_root: std::env::var("MEDIA_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_MEDIA_ROOT)),
            },
            tasks: TaskConfig {
                heartbeat_interval_secs: env_or(
                    "TASK_HEARTBEAT_INTERVAL",
                    DEFAULT_HEARTBEAT_INTERVAL_SECS,
                ),
                lease_secs: env_or("TASK_LEASE_SECS", DEFAULT_LEASE_SECS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::invalid(
                "DB_MAX_CONNECTIONS",
                "must be greater than 0",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::invalid(
                "DB_MIN_CONNECTIONS",
                format!(
                    "{} is greater than DB_MAX_CONNECTIONS ({})",
                    self.database.min_connections, self.database.max_connections
                ),
            ));
        }

        if self.tasks.heartbeat_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "TASK_HEARTBEAT_INTERVAL",
                "must be greater than 0",
            ));
        }

        self.tasks.lease()?;

        if self.assets.imagemagick_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("IMAGEMAGICK_PATH", "cannot be empty"));
        }

        Ok(())
    }
}
