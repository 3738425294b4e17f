//! Storage layer error types.

use rocksdb::ErrorKind;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Store cannot be reached right now
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Photo or face not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A photo with this content hash is already stored
    #[error("Duplicate content hash {hash} (photo {photo_id})")]
    DuplicateHash { hash: String, photo_id: String },

    /// The photo already has a primary face
    #[error("Photo {0} already has a primary face")]
    PrimaryFaceExists(String),

    /// Bad caller-supplied argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    /// Transient failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Unavailable(_) => true,
            StorageError::RocksDb(err) => matches!(
                err.kind(),
                ErrorKind::Busy
                    | ErrorKind::TimedOut
                    | ErrorKind::TryAgain
                    | ErrorKind::Incomplete
                    | ErrorKind::IOError
                    | ErrorKind::ShutdownInProgress
            ),
            _ => false,
        }
    }
}
