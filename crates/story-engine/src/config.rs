//! Configuration for story-engine
//!
//! Loaded from TOML; every key is optional:
//!
//! ```toml
//! debounce_ms = 250
//! default_min_duplicates = 2
//! sample_seed = 7
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    Parse(String),
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet window used to coalesce change bursts and refresh requests
    pub debounce_ms: u64,
    /// Minimum group size reported by duplicate detection
    pub default_min_duplicates: usize,
    /// Fixed RNG seed for reproducible sampling; entropy when absent
    pub sample_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 250,
            default_min_duplicates: 2,
            sample_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// `~/.stories/engine.toml`
    pub fn standard_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".stories").join("engine.toml"))
    }

    /// Load from the standard location, falling back to defaults when the
    /// file does not exist.
    pub fn load_standard() -> Result<Self, ConfigError> {
        match Self::standard_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}
