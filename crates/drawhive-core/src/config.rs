//! Session tuning knobs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default avatar thumbnail edge length in pixels.
pub const DEFAULT_AVATAR_SIZE: u32 = 42;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Limits and sizes of a canvas session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Edge length avatars are normalized to.
    pub avatar_size: u32,
    /// How many of a user's most recent actions can be undone.
    pub undo_depth: usize,
    /// Number of history entries between replay savepoints.
    pub savepoint_interval: u64,
    /// History length above which old entries are folded into the baseline.
    pub compaction_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            avatar_size: DEFAULT_AVATAR_SIZE,
            undo_depth: 30,
            savepoint_interval: 64,
            compaction_threshold: 1000,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON configuration. Missing keys keep their
    /// defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.avatar_size == 0 || self.avatar_size > 1024 {
            return Err(ConfigError::Invalid {
                key: "avatar_size",
                reason: format!("{} is outside 1..=1024", self.avatar_size),
            });
        }
        if self.undo_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "undo_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.savepoint_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "savepoint_interval",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.compaction_threshold < self.undo_depth {
            return Err(ConfigError::Invalid {
                key: "compaction_threshold",
                reason: format!(
                    "{} is smaller than undo_depth ({})",
                    self.compaction_threshold, self.undo_depth
                ),
            });
        }
        Ok(())
    }
}
