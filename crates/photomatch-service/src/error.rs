//! Error types for the PhotoMatch services.

use photomatch_embeddings::EmbeddingError;
use photomatch_storage::StorageError;
use photomatch_vector::VectorError;
use thiserror::Error;

/// Errors returned by ingestion, search and index maintenance.
///
/// Domain signals (duplicate, no face, short result lists) are outcomes,
/// not errors.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Metadata store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Vector index failure
    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    /// Embedding or detector failure
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Bad request parameters
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Search deadline passed before any candidate was ranked
    #[error("Search timed out after {elapsed_ms} ms with no candidates")]
    Timeout { elapsed_ms: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Store-unavailable conditions the caller may retry. The services
    /// never retry internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Violated invariants and integration bugs. The affected operation
    /// (or batch) must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            ServiceError::Vector(err) => err.is_fatal(),
            ServiceError::Embedding(EmbeddingError::DimensionMismatch { .. }) => true,
            _ => false,
        }
    }
}
