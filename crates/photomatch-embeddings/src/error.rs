//! Embedding error types.

use thiserror::Error;

/// Errors that can occur while handling embeddings or running detection.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Vector norm is zero or non-finite, so it cannot be normalized.
    /// Callers treat this as "no usable face".
    #[error("Degenerate vector: {0}")]
    DegenerateVector(String),

    /// Vectors of different lengths were combined. Integration bug, never retried.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Image bytes could not be decoded or are in an unsupported format
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Detector failed for a reason unrelated to the input
    #[error("Detector error: {0}")]
    Detector(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EmbeddingError {
    fn from(err: serde_json::Error) -> Self {
        EmbeddingError::Serialization(err.to_string())
    }
}

impl EmbeddingError {
    /// True for problems with a single input image (bad bytes, bad vector).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EmbeddingError::InvalidImage(_) | EmbeddingError::DegenerateVector(_)
        )
    }
}
