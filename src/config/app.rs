//! Application configuration file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::engine::EngineConfig;
use super::validation::{ConfigError, expand_env_vars};

/// How the binary prints probe results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print one JSON object per probe instead of text lines.
    pub json: bool,
}

/// Top-level configuration file.
///
/// ```yaml
/// probe:
///   target: ${PATHWATCH_TARGET:-192.0.2.1}
///   protocol:
///     kind: udp
///     port: 7007
///   interval: 5s
///   samples: 3
///   retention: 1m
/// output:
///   json: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Engine settings.
    pub probe: EngineConfig,

    /// Output settings.
    #[serde(default)]
    pub output: OutputConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// Environment references are expanded before parsing.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.probe.validate()
    }
}
