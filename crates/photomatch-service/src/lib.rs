//! # photomatch-service
//!
//! Ingestion, similarity search and index maintenance on top of the
//! metadata store and the HNSW index.
//!
//! - [`IngestCoordinator`]: dedup, face selection and two-phase writes
//! - [`SearchService`]: threshold-filtered nearest-face queries
//! - [`rebuild_index`] / [`reconcile`]: keep the in-memory index in step
//!   with the store
//! - [`PhotoMatch`]: a single handle that wires all of the above

pub mod error;
pub mod ingest;
pub mod photomatch;
pub mod rebuild;
pub mod search;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::ServiceError;
pub use ingest::{
    collect_images, select_primary, storage_path, BatchItem, BatchReport, IngestCoordinator,
    IngestOutcome, SUPPORTED_EXTENSIONS,
};
pub use photomatch::{PhotoMatch, ServiceStats};
pub use rebuild::{rebuild_index, reconcile, RebuildReport, ReconcileReport};
pub use search::{
    over_fetch, SearchHit, SearchOutcome, SearchRequest, SearchService, NO_FACE_MESSAGE,
    NO_MATCH_MESSAGE,
};
