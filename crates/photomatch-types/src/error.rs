//! Error types shared across photomatch crates.

use thiserror::Error;

/// Errors raised while building domain values or loading settings.
#[derive(Debug, Error)]
pub enum PhotoMatchError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
