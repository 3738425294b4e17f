//! Vector index trait and types.
//!
//! Defines the interface for face-vector similarity search.

use std::time::Instant;

use photomatch_embeddings::Embedding;
use photomatch_types::FaceId;
use serde::Serialize;

use crate::error::VectorError;

/// Result of a vector search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// Face id the vector was inserted under
    pub vector_id: FaceId,
    /// Cosine distance, `1 - score`
    pub distance: f32,
    /// Cosine similarity (higher = more similar)
    pub score: f32,
}

impl SearchResult {
    pub fn new(vector_id: FaceId, distance: f32) -> Self {
        Self {
            vector_id,
            distance,
            score: 1.0 - distance,
        }
    }
}

/// Ranked hits, nearest first.
#[derive(Debug, Clone, Default)]
pub struct SearchHits {
    pub hits: Vec<SearchResult>,
    /// True when the deadline cut the beam search short; `hits` then holds
    /// whatever had been ranked so far.
    pub timed_out: bool,
}

impl SearchHits {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Per-query knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Beam width; the index default when unset. Always raised to `k`.
    pub ef: Option<usize>,
    /// Wall-clock bound on the layer-0 beam search
    pub deadline: Option<Instant>,
}

impl SearchOptions {
    pub fn with_ef(mut self, ef: usize) -> Self {
        self.ef = Some(ef);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Index statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    /// Number of live vectors in the index
    pub vector_count: usize,
    /// Embedding dimension
    pub dimension: usize,
    /// Highest layer currently in use
    pub max_level: usize,
    /// Vectors removed since the index was created or cleared
    pub removed: usize,
    /// Whether index is available for search
    pub available: bool,
}

/// Trait for vector indexes.
///
/// All operations take `&self`; implementations synchronize internally so
/// one instance can be shared across ingest workers and search requests.
pub trait VectorIndex: Send + Sync {
    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the number of vectors in the index
    fn len(&self) -> usize;

    /// Check if the index is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a unit vector under `id`.
    /// Returns error if ID already exists.
    fn insert(&self, id: FaceId, embedding: &Embedding) -> Result<(), VectorError>;

    /// Search for the `k` nearest neighbors, nearest first.
    /// An empty index yields empty hits, not an error.
    fn search(
        &self,
        query: &Embedding,
        k: usize,
        options: SearchOptions,
    ) -> Result<SearchHits, VectorError>;

    /// Remove a vector by ID. Unknown ids are a no-op returning `false`.
    fn remove(&self, id: FaceId) -> Result<bool, VectorError>;

    /// Remove a vector only if that can happen without waiting on writers.
    /// `None` means the removal was skipped and should be retried later.
    fn try_remove(&self, id: FaceId) -> Result<Option<bool>, VectorError> {
        self.remove(id).map(Some)
    }

    /// Check structural invariants. Indexes without any have nothing to check.
    fn validate(&self) -> Result<(), VectorError> {
        Ok(())
    }

    /// Check if a vector ID exists
    fn contains(&self, id: FaceId) -> bool;

    /// All indexed ids, in no particular order
    fn ids(&self) -> Vec<FaceId>;

    /// Get index statistics
    fn stats(&self) -> IndexStats;

    /// Clear all vectors from the index
    fn clear(&self);
}
