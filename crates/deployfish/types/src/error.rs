//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or validating desired state
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Service \"{0}\" is not defined in the config file")]
    ServiceNotDefined(String),

    #[error("Service \"{service}\" is invalid: {reason}")]
    Invalid { service: String, reason: String },

    #[error("Environment variable {0} referenced by the config file is not set")]
    MissingEnvironment(String),
}

impl ConfigError {
    pub fn invalid(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            service: service.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for config operations
pub type Result<T> = std::result::Result<T, ConfigError>;
