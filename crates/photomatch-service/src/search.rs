//! Similarity search service.
//!
//! Over-fetches candidates from the vector index, drops everything below
//! the similarity threshold, resolves survivors through the metadata store,
//! applies the tag filter and truncates to `top_k`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use photomatch_embeddings::{normalize, Embedding, EmbeddingError, FaceDetector};
use photomatch_storage::MetadataStore;
use photomatch_types::{BoundingBox, FaceId, Settings};
use photomatch_vector::{SearchOptions, VectorIndex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::ingest::select_primary;

/// Shown when the query image has no usable face.
pub const NO_FACE_MESSAGE: &str = "No face detected in the query image";

/// Shown when a face was found but nothing cleared the threshold.
pub const NO_MATCH_MESSAGE: &str =
    "No similar faces found. Try lowering the similarity threshold.";

/// Search parameters.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Maximum results, 1..=max_top_k
    pub top_k: usize,
    /// Minimum similarity, 0.0-1.0
    pub threshold: f32,
    /// Only photos with this tag
    pub tag: Option<String>,
}

impl SearchRequest {
    pub fn new(top_k: usize, threshold: f32) -> Self {
        Self {
            top_k,
            threshold,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// One ranked match.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub face_id: FaceId,
    pub photo_id: String,
    pub path: String,
    pub image_url: String,
    pub tag: Option<String>,
    /// Cosine similarity with the query face
    pub similarity: f32,
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    pub created_at: DateTime<Utc>,
}

/// Search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    /// Best first
    pub results: Vec<SearchHit>,
    pub query_time_ms: u64,
    /// False when the query image had no usable face; nothing was searched
    pub face_detected: bool,
    /// True when the deadline cut the graph search short
    pub timed_out: bool,
    pub message: Option<String>,
}

impl SearchOutcome {
    fn no_face(started: Instant) -> Self {
        Self {
            results: Vec::new(),
            query_time_ms: elapsed_ms(started),
            face_detected: false,
            timed_out: false,
            message: Some(NO_FACE_MESSAGE.to_string()),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Candidates requested from the index for a `top_k` query.
pub fn over_fetch(top_k: usize) -> usize {
    (top_k * 2).max(top_k + 20)
}

/// Answers face similarity queries.
pub struct SearchService {
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    detector: Arc<dyn FaceDetector>,
    settings: Arc<Settings>,
}

impl SearchService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        detector: Arc<dyn FaceDetector>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            store,
            index,
            detector,
            settings,
        }
    }

    /// Search with the primary face of a query image.
    ///
    /// An image without a usable face short-circuits with
    /// `face_detected = false` instead of searching.
    pub fn search_image(
        &self,
        image: &[u8],
        request: &SearchRequest,
    ) -> Result<SearchOutcome, ServiceError> {
        let started = Instant::now();
        self.validate(request)?;

        let detection = self.detector.detect(image)?;
        let Some(primary) = select_primary(&detection.faces) else {
            debug!("Query image has no faces");
            return Ok(SearchOutcome::no_face(started));
        };
        let raw = detection.faces[primary].embedding.clone();
        if raw.len() != self.index.dimension() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: raw.len(),
            }
            .into());
        }
        let query = match normalize(raw) {
            Ok(values) => Embedding::from_normalized(values),
            Err(err) => {
                debug!(error = %err, "Query face vector unusable");
                return Ok(SearchOutcome::no_face(started));
            }
        };
        self.run(&query, request, started)
    }

    /// Search with an already normalized query vector.
    pub fn search_vector(
        &self,
        query: &Embedding,
        request: &SearchRequest,
    ) -> Result<SearchOutcome, ServiceError> {
        let started = Instant::now();
        self.validate(request)?;
        query.check_dimension(self.index.dimension())?;
        self.run(query, request, started)
    }

    /// Remove stale entries without waiting behind in-flight inserts.
    /// Skipped ones stay filtered out and are retried by the next search.
    fn drop_stale(&self, stale: &[FaceId]) -> Result<(), ServiceError> {
        for &face_id in stale {
            match self.index.try_remove(face_id)? {
                Some(_) => warn!(face_id, "Dropped stale index entry"),
                None => debug!(face_id, "Stale index entry left for a later search"),
            }
        }
        Ok(())
    }

    fn validate(&self, request: &SearchRequest) -> Result<(), ServiceError> {
        let max = self.settings.search.max_top_k;
        if request.top_k == 0 || request.top_k > max {
            return Err(ServiceError::InvalidArgument(format!(
                "top_k must be 1-{max}, got {}",
                request.top_k
            )));
        }
        if !(0.0..=1.0).contains(&request.threshold) {
            return Err(ServiceError::InvalidArgument(format!(
                "threshold must be 0.0-1.0, got {}",
                request.threshold
            )));
        }
        Ok(())
    }

    fn run(
        &self,
        query: &Embedding,
        request: &SearchRequest,
        started: Instant,
    ) -> Result<SearchOutcome, ServiceError> {
        let mut options = SearchOptions::default();
        if self.settings.search.timeout_ms > 0 {
            options = options
                .with_deadline(started + Duration::from_millis(self.settings.search.timeout_ms));
        }

        let fetch = over_fetch(request.top_k);
        let candidates = self.index.search(query, fetch, options)?;
        if candidates.timed_out && candidates.is_empty() {
            return Err(ServiceError::Timeout {
                elapsed_ms: elapsed_ms(started),
            });
        }

        let above: Vec<(FaceId, f32)> = candidates
            .hits
            .iter()
            .map(|hit| (hit.vector_id, hit.score.clamp(-1.0, 1.0)))
            .filter(|(_, similarity)| *similarity >= request.threshold)
            .collect();
        let ids: Vec<FaceId> = above.iter().map(|(id, _)| *id).collect();
        let resolved = self.store.resolve_faces_to_photos(&ids)?;

        let mut results = Vec::with_capacity(request.top_k);
        let mut stale = Vec::new();
        for (face_id, similarity) in above {
            let Some(found) = resolved.get(&face_id) else {
                // Store is the source of truth; the index entry is stale.
                stale.push(face_id);
                continue;
            };
            if !found.face.indexed {
                continue;
            }
            if !found.photo.matches_tag(request.tag.as_deref()) {
                continue;
            }
            results.push(SearchHit {
                face_id,
                photo_id: found.photo.photo_id.clone(),
                path: found.photo.path.clone(),
                image_url: self.settings.image_url(&found.photo.path),
                tag: found.photo.tag.clone(),
                similarity,
                bbox: found.face.bbox,
                width: found.photo.width,
                height: found.photo.height,
                created_at: found.photo.created_at,
            });
        }
        // Stable: equal similarities keep index order, earliest insert first.
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(request.top_k);
        self.drop_stale(&stale)?;

        let query_time_ms = elapsed_ms(started);
        info!(
            top_k = request.top_k,
            threshold = request.threshold,
            candidates = candidates.len(),
            results = results.len(),
            query_time_ms,
            "Search complete"
        );
        let message = results.is_empty().then(|| NO_MATCH_MESSAGE.to_string());
        Ok(SearchOutcome {
            results,
            query_time_ms,
            face_detected: true,
            timed_out: candidates.timed_out,
            message,
        })
    }
}
