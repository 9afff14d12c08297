//! Playground configuration
//!
//! Loaded from JSON. Every field has a default, so `{}` is a valid file.

use crate::bridge::DEFAULT_STDIN_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Program loaded into the editor on first visit
pub const DEFAULT_SOURCE: &str = "x = int(input(\"Enter a number: \"))\n\
y = int(input(\"Enter a second number: \"))\n\
z = x + y\n\
print(f\"The sum of the two numbers is {z}\")";

pub const DEFAULT_WORKER_NAME: &str = "interpreter-worker";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaygroundConfig {
    /// Data bytes of the stdin bus, excluding the length prefix
    pub stdin_capacity: usize,
    pub default_source: String,
    /// Thread name given to the worker
    pub worker_name: String,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            stdin_capacity: DEFAULT_STDIN_CAPACITY,
            default_source: DEFAULT_SOURCE.to_string(),
            worker_name: DEFAULT_WORKER_NAME.to_string(),
        }
    }
}

impl PlaygroundConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stdin_capacity == 0 {
            return Err(ConfigError::Invalid("stdinCapacity must be positive".into()));
        }
        if u32::try_from(self.stdin_capacity).is_err() {
            return Err(ConfigError::Invalid(format!(
                "stdinCapacity {} does not fit the 4-byte length prefix",
                self.stdin_capacity
            )));
        }
        if self.worker_name.is_empty() {
            return Err(ConfigError::Invalid("workerName must not be empty".into()));
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
