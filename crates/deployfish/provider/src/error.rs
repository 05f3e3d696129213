//! Provider error types

use std::path::PathBuf;
use thiserror::Error;

/// Infrastructure errors
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("Provider rejected {operation}: {detail}")]
    Rejected { operation: String, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Cannot access state file {path}: {source}")]
    StateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InfrastructureError {
    pub fn rejected(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Rejected {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, InfrastructureError>;
