//! CLI error types

use deployfish_engine::EngineError;
use deployfish_provider::InfrastructureError;
use deployfish_types::ConfigError;
use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Lifecycle operation failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// `deployfish.yml` could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Provider call outside of an engine operation
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    /// CLI settings error
    #[error("Settings error: {0}")]
    Settings(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON rendering error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML rendering error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
