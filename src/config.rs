//! Texalias Configuration
//!
//! Handles parsing and management of texalias.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// File name searched for by [`TexaliasConfig::find_and_load`].
pub const CONFIG_FILE_NAME: &str = "texalias.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching texalias.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TexaliasConfig {
    /// Composite construction checks
    #[serde(default)]
    pub composite: CompositeConfig,

    /// Record table behavior
    #[serde(default)]
    pub table: TableConfig,
}

impl TexaliasConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: TexaliasConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir()?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Checks applied when building a composite record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompositeConfig {
    /// Reject constituents whose shapes differ
    #[serde(default = "default_true")]
    pub validate_shapes: bool,

    /// Reject constituents that are not float32
    #[serde(default = "default_true")]
    pub validate_dtypes: bool,

    /// Allow one record to serve as both the real and the imaginary part
    #[serde(default)]
    pub allow_shared_constituent: bool,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            validate_shapes: true,
            validate_dtypes: true,
            allow_shared_constituent: false,
        }
    }
}

/// Record table settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableConfig {
    /// Initial record capacity
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Release deferred records as soon as both counters reach zero.
    /// When off, they wait for an explicit sweep.
    #[serde(default = "default_true")]
    pub release_deferred_on_zero: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            release_deferred_on_zero: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_initial_capacity() -> usize {
    64
}
