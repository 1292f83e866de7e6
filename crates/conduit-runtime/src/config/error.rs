//! Errors raised while loading or validating a [`ConduitConfig`](super::ConduitConfig).

use std::path::PathBuf;
use thiserror::Error;

/// Why a configuration could not be produced.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// No enabled format feature reads this file.
    #[error("No enabled format reads {}; enable toml-config or yaml-config", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// figment could not merge the sources into the schema.
    #[error("Failed to extract configuration: {0}")]
    Extract(Box<figment::Error>),

    /// A setting is present but unusable.
    #[error("Invalid configuration for {setting}: {message}")]
    ValidationError {
        setting: &'static str,
        message: String,
    },

    /// A setting the pump cannot run without is empty.
    #[error("Missing required configuration field: {field}")]
    MissingField { field: &'static str },
}

impl ConfigError {
    /// Creates a validation error for one setting.
    pub fn validation(setting: &'static str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            setting,
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    /// Returns the dotted path of the offending setting, when there is one.
    pub fn setting(&self) -> Option<&'static str> {
        match self {
            Self::ValidationError { setting, .. } => Some(setting),
            Self::MissingField { field } => Some(field),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Extract(Box::new(err))
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
