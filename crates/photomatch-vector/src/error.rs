//! Vector index error types.

use thiserror::Error;

/// Errors that can occur during vector operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The id is already indexed
    #[error("Vector already indexed: {0}")]
    DuplicateId(u64),

    /// The graph references an entry that no longer exists
    #[error("Broken index invariant: {0}")]
    BrokenInvariant(String),

    /// Invalid index parameters
    #[error("Invalid index configuration: {0}")]
    InvalidConfig(String),

    /// Embedding error
    #[error("Embedding error: {0}")]
    Embedding(#[from] photomatch_embeddings::EmbeddingError),
}

impl VectorError {
    /// Invariant violations and integration bugs. Never retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VectorError::DimensionMismatch { .. } | VectorError::BrokenInvariant(_)
        )
    }
}
