//! Configuration management for Roundtable
//!
//! This module provides configuration loading, saving, and global state
//! management. Configuration is loaded from `~/.roundtable/config.json`
//! with `ROUNDTABLE_*` environment variable overrides.

mod types;

pub use types::*;

use crate::error::{Result, RoundtableError};
use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Global configuration instance
static CONFIG: OnceCell<RwLock<Config>> = OnceCell::new();

impl Config {
    /// Returns the Roundtable configuration directory path (~/.roundtable)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".roundtable")
    }

    /// Returns the path to the config file (~/.roundtable/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables follow the pattern: `ROUNDTABLE_SECTION_KEY`.
    fn apply_env_overrides(&mut self) {
        // Provider
        if let Ok(val) = std::env::var("ROUNDTABLE_PROVIDER_API_BASE") {
            self.provider.api_base = val;
        }
        if let Ok(val) = std::env::var("ROUNDTABLE_PROVIDER_API_KEY") {
            self.provider.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("ROUNDTABLE_PROVIDER_MODEL") {
            self.provider.model = val;
        }

        // Bridge
        if let Ok(val) = std::env::var("ROUNDTABLE_BRIDGE_HOST") {
            self.bridge.host = val;
        }
        if let Ok(val) = std::env::var("ROUNDTABLE_BRIDGE_PORT") {
            if let Ok(v) = val.parse() {
                self.bridge.port = v;
            }
        }
        if let Ok(val) = std::env::var("ROUNDTABLE_BRIDGE_POLL_INTERVAL_MS") {
            if let Ok(v) = val.parse() {
                self.bridge.poll_interval_ms = v;
            }
        }

        // Orchestrator
        if let Ok(val) = std::env::var("ROUNDTABLE_ORCHESTRATOR_MAX_ROUNDS") {
            if let Ok(v) = val.parse() {
                self.orchestrator.max_rounds = v;
            }
        }
        if let Ok(val) = std::env::var("ROUNDTABLE_ORCHESTRATOR_COMPLETION_MARKER") {
            self.orchestrator.completion_marker = val;
        }

        // Workspace
        if let Ok(val) = std::env::var("ROUNDTABLE_WORKSPACE_DIR") {
            self.workspace.dir = val;
        }

        // Logging
        if let Ok(val) = std::env::var("ROUNDTABLE_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Initialize the global configuration.
    ///
    /// This should be called once at startup. Subsequent calls will return
    /// an error if the config is already initialized.
    pub fn init() -> Result<()> {
        let config = Self::load()?;
        CONFIG
            .set(RwLock::new(config))
            .map_err(|_| RoundtableError::Config("Configuration already initialized".to_string()))
    }

    /// Initialize the global configuration with a specific config.
    ///
    /// Useful for testing or custom initialization.
    pub fn init_with(config: Config) -> Result<()> {
        CONFIG
            .set(RwLock::new(config))
            .map_err(|_| RoundtableError::Config("Configuration already initialized".to_string()))
    }

    /// Get a clone of the current global configuration.
    ///
    /// Returns default configuration if not yet initialized.
    pub fn get() -> Config {
        CONFIG
            .get()
            .and_then(|lock| lock.read().ok())
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Returns the expanded workspace path (resolves ~ to home directory)
    pub fn workspace_path(&self) -> PathBuf {
        expand_home(&self.workspace.dir)
    }

    /// Returns the expanded lesson log path.
    pub fn lessons_path(&self) -> PathBuf {
        expand_home(&self.learning.file)
    }

    /// Returns the shared context log path inside the workspace.
    pub fn context_log_path(&self) -> PathBuf {
        self.workspace_path().join(&self.bridge.context_log_file)
    }
}

/// Expand ~ to home directory in a path string
fn expand_home(path: &str) -> PathBuf {
    if path.is_empty() {
        return PathBuf::from(path);
    }

    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            if path.len() > 1 && path.chars().nth(1) == Some('/') {
                return home.join(&path[2..]);
            }
            return home;
        }
    }

    PathBuf::from(path)
}
