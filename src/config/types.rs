//! Configuration types.

use crate::format::OutputFormat;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

/// Server-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Default output format for read tools (json or markdown).
    #[serde(default)]
    pub default_format: OutputFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            default_format: OutputFormat::default(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("project-tree/tasks.db")
}

/// Task engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a mutation waits for the database write lock before failing
    /// with `LOCK_TIMEOUT`.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Page size used when a listing does not ask for one.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Upper bound on the page size of every listing.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_page_size() -> u32 {
    10
}

fn default_max_page_size() -> u32 {
    100
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a single YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // An empty or comment-only file parses as null.
        let config: Option<Config> = serde_yaml::from_str(&content)?;
        Ok(config.unwrap_or_default())
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.max_page_size == 0 {
            bail!("engine.max_page_size must be at least 1");
        }
        if engine.default_page_size == 0 || engine.default_page_size > engine.max_page_size {
            bail!(
                "engine.default_page_size must be between 1 and engine.max_page_size ({})",
                engine.max_page_size
            );
        }
        if engine.lock_timeout_ms == 0 {
            bail!("engine.lock_timeout_ms must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.db_path, PathBuf::from("project-tree/tasks.db"));
        assert_eq!(config.server.default_format, OutputFormat::Json);
        assert_eq!(config.engine.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.engine.default_page_size, 10);
        assert_eq!(config.engine.max_page_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str("engine:\n  max_page_size: 50\n").unwrap();
        assert_eq!(config.engine.max_page_size, 50);
        assert_eq!(config.engine.default_page_size, 10);
        assert_eq!(config.server.db_path, PathBuf::from("project-tree/tasks.db"));
    }

    #[test]
    fn validate_rejects_inverted_page_sizes() {
        let mut config = Config::default();
        config.engine.default_page_size = 200;
        assert!(config.validate().is_err());

        config.engine.default_page_size = 10;
        config.engine.lock_timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
