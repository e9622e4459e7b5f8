//! TOML-based configuration for diagramvc.
//!
//! Every section is optional. The author name can be taken from an
//! environment variable named by `general.author_env`, resolved at runtime
//! via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Author, logging and branch naming.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Where the version database lives.
    #[serde(default)]
    pub store: StoreConfig,

    /// History listing defaults.
    #[serde(default)]
    pub history: HistoryConfig,
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Recorded as `created_by` on new branches and versions.
    #[serde(default = "default_author")]
    pub author: String,

    /// Environment variable that overrides `author` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_env: Option<String>,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Name given to the branch created when a diagram is initialized.
    #[serde(default = "default_branch_name")]
    pub default_branch_name: String,
}

fn default_author() -> String {
    "local".into()
}
fn default_log_level() -> String {
    "warn".into()
}
fn default_branch_name() -> String {
    "main".into()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            author: default_author(),
            author_env: None,
            log_level: default_log_level(),
            default_branch_name: default_branch_name(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("diagramvc"))
        .unwrap_or_else(|| PathBuf::from(".diagramvc"))
}
fn default_database_file() -> String {
    "diagramvc.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of versions shown by `log` when no limit is given.
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,
}

fn default_history_limit() -> usize {
    20
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Apply the `author_env` override. A missing or empty variable keeps the
    /// configured author and logs a warning.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.general.author_env {
            if let Some(author) = resolve_optional_env(env_name, "general.author_env") {
                self.general.author = author;
            }
        }
        Ok(())
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.author.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.author".into(),
                detail: "author must not be empty".into(),
            });
        }
        if self.general.default_branch_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "general.default_branch_name".into(),
                detail: "default branch name must not be empty".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.general.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".into(),
                detail: format!("must be one of {}", LOG_LEVELS.join(", ")),
            });
        }
        if self.store.database_file.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "store.database_file".into(),
                detail: "database file name must not be empty".into(),
            });
        }
        if self.history.default_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "history.default_limit".into(),
                detail: "history limit must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Full path of the version database.
    pub fn database_path(&self) -> PathBuf {
        self.store.data_dir.join(&self.store.database_file)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
