use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeftError};

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-unit backend invocation timeout in seconds. `None` disables the
    /// timeout. Production deployments should set this so a hung branch
    /// cannot block a whole run.
    #[serde(default)]
    pub unit_timeout_secs: Option<u64>,

    /// Capacity of the pipeline event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_event_capacity() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unit_timeout_secs: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| WeftError::ConfigNotFound(path.display().to_string()))?;

        toml::from_str(&content).map_err(|e| WeftError::Config(e.to_string()))
    }
}
