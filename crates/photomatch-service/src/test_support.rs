//! Shared fixtures for the service tests.

use std::collections::HashMap;
use std::sync::Arc;

use photomatch_embeddings::{DetectedFace, Detection, Embedding, PrecomputedDetector};
use photomatch_storage::{MetadataStore, PhotoStore, StorageError};
use photomatch_types::{
    FaceId, FaceRecord, IngestSettings, NewFace, NewPhoto, PhotoPage, PhotoRecord, PhotoStats,
    ResolvedFace, Settings,
};
use photomatch_vector::{
    HnswConfig, HnswIndex, IndexStats, SearchHits, SearchOptions, VectorError, VectorIndex,
};
use tempfile::TempDir;

use crate::ingest::IngestCoordinator;
use crate::search::SearchService;

pub fn raw_face(bbox: [f32; 4], embedding: Vec<f32>) -> DetectedFace {
    DetectedFace::new(bbox, embedding)
}

/// Temp store, seeded index and precomputed detector wired together.
pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<dyn MetadataStore>,
    pub index: Arc<HnswIndex>,
    pub detector: Arc<PrecomputedDetector>,
    pub settings: Arc<Settings>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_dimension(4)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        let settings = Settings {
            embedding_dim: dimension,
            ..Settings::default()
        };
        Self::with_settings(settings)
    }

    pub fn with_ingest(ingest: IngestSettings) -> Self {
        let settings = Settings {
            embedding_dim: 4,
            ingest,
            ..Settings::default()
        };
        Self::with_settings(settings)
    }

    pub fn with_settings(settings: Settings) -> Self {
        let dir = TempDir::new().unwrap();
        let store = PhotoStore::open(&dir.path().join("db")).unwrap();
        let config = HnswConfig::from_settings(settings.embedding_dim, &settings.index).with_seed(42);
        let index = HnswIndex::new(config).unwrap();
        Self {
            dir,
            store: Arc::new(store),
            index: Arc::new(index),
            detector: Arc::new(PrecomputedDetector::new(settings.embedding_dim)),
            settings: Arc::new(settings),
        }
    }

    /// Fake image bytes whose detection is `faces` on a 100x100 canvas.
    pub fn image(&self, name: &str, faces: Vec<DetectedFace>) -> Vec<u8> {
        let bytes = format!("image:{name}").into_bytes();
        self.detector.register(&bytes, Detection::new(100, 100, faces));
        bytes
    }

    pub fn coordinator(&self) -> IngestCoordinator {
        IngestCoordinator::new(
            self.store.clone(),
            self.index.clone(),
            self.detector.clone(),
            self.settings.ingest.clone(),
            self.settings.embedding_dim,
        )
    }

    pub fn search_service(&self) -> SearchService {
        SearchService::new(
            self.store.clone(),
            self.index.clone(),
            self.detector.clone(),
            self.settings.clone(),
        )
    }
}

/// Index that refuses every insert and whose searches always time out.
pub struct RejectingIndex {
    dimension: usize,
}

impl RejectingIndex {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl VectorIndex for RejectingIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        0
    }

    fn insert(&self, id: FaceId, _embedding: &Embedding) -> Result<(), VectorError> {
        Err(VectorError::DuplicateId(id))
    }

    fn search(
        &self,
        _query: &Embedding,
        _k: usize,
        _options: SearchOptions,
    ) -> Result<SearchHits, VectorError> {
        Ok(SearchHits {
            hits: Vec::new(),
            timed_out: true,
        })
    }

    fn remove(&self, _id: FaceId) -> Result<bool, VectorError> {
        Ok(false)
    }

    fn contains(&self, _id: FaceId) -> bool {
        false
    }

    fn ids(&self) -> Vec<FaceId> {
        Vec::new()
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            vector_count: 0,
            dimension: self.dimension,
            max_level: 0,
            removed: 0,
            available: true,
        }
    }

    fn clear(&self) {}
}

/// Store whose backend is always down.
pub struct UnavailableStore;

fn down<T>() -> Result<T, StorageError> {
    Err(StorageError::Unavailable("store offline".to_string()))
}

impl MetadataStore for UnavailableStore {
    fn create_photo(&self, _photo: NewPhoto) -> Result<PhotoRecord, StorageError> {
        down()
    }

    fn create_face(&self, _face: NewFace) -> Result<FaceRecord, StorageError> {
        down()
    }

    fn find_photo_by_hash(&self, _content_hash: &str) -> Result<Option<PhotoRecord>, StorageError> {
        down()
    }

    fn get_photo(&self, _photo_id: &str) -> Result<Option<PhotoRecord>, StorageError> {
        down()
    }

    fn get_face(&self, _face_id: FaceId) -> Result<Option<FaceRecord>, StorageError> {
        down()
    }

    fn faces_for_photo(&self, _photo_id: &str) -> Result<Vec<FaceRecord>, StorageError> {
        down()
    }

    fn delete_photo_and_faces(&self, _photo_id: &str) -> Result<Option<Vec<FaceId>>, StorageError> {
        down()
    }

    fn list_photos_page(
        &self,
        _page: usize,
        _page_size: usize,
        _tag: Option<&str>,
    ) -> Result<PhotoPage, StorageError> {
        down()
    }

    fn resolve_faces_to_photos(
        &self,
        _face_ids: &[FaceId],
    ) -> Result<HashMap<FaceId, ResolvedFace>, StorageError> {
        down()
    }

    fn primary_faces(&self) -> Result<Vec<FaceRecord>, StorageError> {
        down()
    }

    fn set_face_indexed(&self, _face_id: FaceId, _indexed: bool) -> Result<(), StorageError> {
        down()
    }

    fn stats(&self) -> Result<PhotoStats, StorageError> {
        down()
    }
}

/// Wraps a real index whose removals never go through: `remove` reports a
/// broken graph and `try_remove` always finds writers active.
pub struct StuckIndex {
    inner: Arc<HnswIndex>,
}

impl StuckIndex {
    pub fn new(inner: Arc<HnswIndex>) -> Self {
        Self { inner }
    }
}

impl VectorIndex for StuckIndex {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn insert(&self, id: FaceId, embedding: &Embedding) -> Result<(), VectorError> {
        self.inner.insert(id, embedding)
    }

    fn search(
        &self,
        query: &Embedding,
        k: usize,
        options: SearchOptions,
    ) -> Result<SearchHits, VectorError> {
        self.inner.search(query, k, options)
    }

    fn remove(&self, id: FaceId) -> Result<bool, VectorError> {
        Err(VectorError::BrokenInvariant(format!(
            "neighbor list of face {id} points at a missing slot"
        )))
    }

    fn try_remove(&self, _id: FaceId) -> Result<Option<bool>, VectorError> {
        Ok(None)
    }

    fn contains(&self, id: FaceId) -> bool {
        self.inner.contains(id)
    }

    fn ids(&self) -> Vec<FaceId> {
        self.inner.ids()
    }

    fn stats(&self) -> IndexStats {
        self.inner.stats()
    }

    fn clear(&self) {
        self.inner.clear()
    }
}
