//! Engine error types

use deployfish_provider::InfrastructureError;
use deployfish_types::ConfigError;
use thiserror::Error;

/// Reconciliation errors
///
/// Convergence timeouts and declined confirmations are not errors; see
/// [`crate::Outcome`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] InfrastructureError),

    #[error("Service \"{service}\" already exists in cluster \"{cluster}\"")]
    AlreadyExists { cluster: String, service: String },

    #[error("Service \"{service}\" does not exist in cluster \"{cluster}\"")]
    ServiceNotFound { cluster: String, service: String },

    #[error("Cannot change {field} of an existing service: live is {live}, config has {desired}")]
    ImmutableField {
        field: String,
        live: String,
        desired: String,
    },

    #[error(
        "Capacity group \"{group}\" cannot grow to {requested} instances: allowed range is [{min}, {max}]"
    )]
    Capacity {
        group: String,
        requested: u32,
        min: u32,
        max: u32,
    },

    #[error("Invalid task count {0}: must be zero or greater")]
    InvalidCount(i64),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
