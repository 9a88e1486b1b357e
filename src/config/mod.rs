//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::DatasetDescriptor;
use crate::navigator::SessionConfig;
use crate::registry;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at the given path.
    Defaults(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "Loaded configuration from {:?}", path),
            ConfigSource::Defaults(path) => {
                write!(f, "No config file at {:?}, using defaults", path)
            }
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where artifacts are written
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub session: SessionConfig,

    /// Datasets in processing order
    #[serde(default = "registry::builtin")]
    pub datasets: Vec<DatasetDescriptor>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            session: SessionConfig::default(),
            datasets: registry::builtin(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    ///
    /// Runs before logging is set up, so it reports where the configuration
    /// came from instead of logging it.
    pub fn load_or_default(path: &Path) -> Result<(Self, ConfigSource), ConfigError> {
        if path.exists() {
            let config = Self::from_file(path)?;
            Ok((config, ConfigSource::File(path.to_path_buf())))
        } else {
            Ok((Self::default(), ConfigSource::Defaults(path.to_path_buf())))
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session
            .validate()
            .map_err(ConfigError::ValidationError)?;

        let mut seen = HashSet::new();
        for dataset in &self.datasets {
            if !seen.insert(dataset.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate dataset id: {}",
                    dataset.id
                )));
            }

            if !dataset.filename.is_year_dependent() {
                return Err(ConfigError::ValidationError(format!(
                    "Filename template for {} must contain {{year}}: {}",
                    dataset.id,
                    dataset.filename.as_str()
                )));
            }

            if dataset.years.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Year range for {} is empty",
                    dataset.id
                )));
            }
        }

        Ok(())
    }
}
