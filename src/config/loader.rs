//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
///
/// A missing file at the default location is not an error: the defaults
/// describe a conventional project layout.
pub fn load_config(path: &Path, required: bool) -> Result<AppConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}
