//! Configuration loader with tier-based merging.

use super::merge::merge_layers;
use super::types::Config;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration tier priority (lowest to highest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigTier {
    Defaults = 0,
    /// `$CWD/project-tree/config.yaml`
    Project = 1,
    /// `~/.project-tree/config.yaml`
    User = 2,
    /// `PROJECT_TREE_*` variables
    Environment = 3,
}

impl std::fmt::Display for ConfigTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigTier::Defaults => write!(f, "defaults"),
            ConfigTier::Project => write!(f, "project"),
            ConfigTier::User => write!(f, "user"),
            ConfigTier::Environment => write!(f, "environment"),
        }
    }
}

/// Directories searched for `config.yaml`.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub project_dir: Option<PathBuf>,
    pub user_dir: Option<PathBuf>,
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::discover()
    }
}

impl ConfigPaths {
    /// `PROJECT_TREE_PROJECT_DIR` or `./project-tree`, and
    /// `PROJECT_TREE_USER_DIR` or `~/.project-tree`.
    pub fn discover() -> Self {
        Self::discover_with_env(|key| std::env::var(key).ok())
    }

    /// [`ConfigPaths::discover`] with a custom environment lookup.
    pub fn discover_with_env<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let project_dir = env("PROJECT_TREE_PROJECT_DIR")
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from("project-tree")));

        let user_dir = env("PROJECT_TREE_USER_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".project-tree")));

        Self {
            project_dir,
            user_dir,
        }
    }

    pub fn with_dirs(project_dir: Option<PathBuf>, user_dir: Option<PathBuf>) -> Self {
        Self {
            project_dir,
            user_dir,
        }
    }

    fn tier_file(&self, tier: ConfigTier) -> Option<PathBuf> {
        let dir = match tier {
            ConfigTier::Project => self.project_dir.as_ref(),
            ConfigTier::User => self.user_dir.as_ref(),
            ConfigTier::Defaults | ConfigTier::Environment => None,
        }?;
        Some(dir.join("config.yaml"))
    }
}

/// Loaded configuration plus where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    pub paths: ConfigPaths,
    config: Config,
    /// Files that contributed, lowest tier first.
    sources: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Load configuration from all tiers.
    pub fn load() -> Result<Self> {
        Self::load_from_env(|key| std::env::var(key).ok())
    }

    /// Discover tier directories and read overrides through one lookup.
    pub fn load_from_env<F>(env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let paths = ConfigPaths::discover_with_env(&env);
        Self::load_with_env(paths, env)
    }

    /// Load from an explicit file, then apply environment overrides.
    pub fn load_file(path: &Path) -> Result<Self> {
        let mut config = Config::load(path)
            .with_context(|| format!("failed to load config file {}", path.display()))?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(Self {
            paths: ConfigPaths::with_dirs(None, None),
            config,
            sources: vec![path.to_path_buf()],
        })
    }

    /// Load with a custom environment lookup.
    pub fn load_with_env<F>(paths: ConfigPaths, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(explicit) = env("PROJECT_TREE_CONFIG_PATH") {
            let path = PathBuf::from(explicit);
            let mut config = Config::load(&path)
                .with_context(|| format!("failed to load config file {}", path.display()))?;
            apply_env_overrides(&mut config, &env);
            config.validate()?;
            return Ok(Self {
                paths,
                config,
                sources: vec![path],
            });
        }

        let mut layers = vec![serde_json::to_value(Config::default())?];
        let mut sources = Vec::new();

        for tier in [ConfigTier::Project, ConfigTier::User] {
            let Some(file) = paths.tier_file(tier) else {
                continue;
            };
            if let Some(layer) = read_layer(&file, tier) {
                debug!(tier = %tier, path = %file.display(), "Loaded config layer");
                layers.push(layer);
                sources.push(file);
            }
        }

        let mut config: Config = serde_json::from_value(merge_layers(layers))?;
        apply_env_overrides(&mut config, &env);
        config.validate()?;

        Ok(Self {
            paths,
            config,
            sources,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }
}

/// A tier file that is missing is skipped silently; one that is unreadable
/// or malformed is skipped with a warning.
fn read_layer(file: &Path, tier: ConfigTier) -> Option<Value> {
    if !file.exists() {
        return None;
    }
    let content = match std::fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) => {
            warn!(tier = %tier, path = %file.display(), error = %e, "Cannot read config file");
            return None;
        }
    };
    match serde_yaml::from_str::<Value>(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(tier = %tier, path = %file.display(), error = %e, "Ignoring malformed config file");
            None
        }
    }
}

/// Highest tier: `PROJECT_TREE_DB_PATH` and `PROJECT_TREE_LOCK_TIMEOUT_MS`.
fn apply_env_overrides<F>(config: &mut Config, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(db_path) = env("PROJECT_TREE_DB_PATH") {
        config.server.db_path = PathBuf::from(db_path);
    }

    if let Some(raw) = env("PROJECT_TREE_LOCK_TIMEOUT_MS") {
        match raw.trim().parse::<u64>() {
            Ok(ms) => config.engine.lock_timeout_ms = ms,
            Err(_) => warn!(value = %raw, "Ignoring invalid PROJECT_TREE_LOCK_TIMEOUT_MS"),
        }
    }
}
