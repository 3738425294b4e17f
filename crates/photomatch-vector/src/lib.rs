//! # photomatch-vector
//!
//! Approximate nearest-neighbor index over face embeddings.
//!
//! The index is a multi-layer proximity graph (HNSW) kept entirely in
//! memory. It is a derived structure: the metadata store owns the vectors
//! and the index can always be rebuilt from it.
//!
//! ## Recall
//! Results are approximate. A query may miss a true nearest neighbor;
//! raising `ef_construction` and the per-query `ef` trades latency for
//! recall. Callers needing exact results must not rely on this index.
//!
//! ## Concurrency
//! - Searches take no index-wide lock and never wait on an insert.
//! - Inserts run concurrently with each other; each neighbor-list update
//!   swaps in a fresh list under that list's own lock.
//! - Deletes are exclusive with inserts, not with searches.

pub mod error;
pub mod hnsw;
pub mod index;

pub use error::VectorError;
pub use hnsw::{HnswConfig, HnswIndex};
pub use index::{IndexStats, SearchHits, SearchOptions, SearchResult, VectorIndex};
