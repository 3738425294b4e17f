//! Top-level handle that wires the store, index, detector and services.

use std::path::Path;
use std::sync::Arc;

use photomatch_embeddings::{Embedding, FaceDetector};
use photomatch_storage::{MetadataStore, PhotoStore};
use photomatch_types::{FaceId, PhotoPage, PhotoRecord, PhotoStats, Settings};
use photomatch_vector::{HnswConfig, HnswIndex, IndexStats, VectorIndex};
use serde::Serialize;
use tracing::{error, info};

use crate::error::ServiceError;
use crate::ingest::{BatchReport, IngestCoordinator, IngestOutcome};
use crate::rebuild::{rebuild_index, reconcile, RebuildReport, ReconcileReport};
use crate::search::{SearchOutcome, SearchRequest, SearchService};

/// Combined store and index statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub photos: PhotoStats,
    pub index: IndexStats,
}

/// A running PhotoMatch instance.
pub struct PhotoMatch {
    settings: Arc<Settings>,
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    ingest: IngestCoordinator,
    search: SearchService,
}

impl PhotoMatch {
    /// Open the metadata store at `settings.db_path` and rebuild the index
    /// from it.
    pub fn open(settings: Settings, detector: Arc<dyn FaceDetector>) -> Result<Self, ServiceError> {
        settings.validate().map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;
        let info = detector.info();
        if info.dimension != settings.embedding_dim {
            return Err(ServiceError::InvalidArgument(format!(
                "detector {} produces {}-d vectors, embedding_dim is {}",
                info.name, info.dimension, settings.embedding_dim
            )));
        }

        let db_path = settings.expanded_db_path();
        std::fs::create_dir_all(&db_path)?;
        let store = PhotoStore::open(&db_path)?;
        let index = HnswIndex::new(HnswConfig::from_settings(
            settings.embedding_dim,
            &settings.index,
        ))?;
        info!(db_path = %db_path.display(), detector = %info.name, "Opened PhotoMatch");

        let engine = Self::with_parts(settings, Arc::new(store), Arc::new(index), detector);
        engine.rebuild()?;
        Ok(engine)
    }

    /// Assemble from existing parts without rebuilding.
    pub fn with_parts(
        settings: Settings,
        store: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        detector: Arc<dyn FaceDetector>,
    ) -> Self {
        let settings = Arc::new(settings);
        let ingest = IngestCoordinator::new(
            store.clone(),
            index.clone(),
            detector.clone(),
            settings.ingest.clone(),
            settings.embedding_dim,
        );
        let search = SearchService::new(store.clone(), index.clone(), detector, settings.clone());
        Self {
            settings,
            store,
            index,
            ingest,
            search,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn coordinator(&self) -> &IngestCoordinator {
        &self.ingest
    }

    pub fn ingest(
        &self,
        image: &[u8],
        path: &str,
        tag: Option<&str>,
    ) -> Result<IngestOutcome, ServiceError> {
        self.ingest.ingest(image, path, tag)
    }

    pub fn ingest_file(
        &self,
        path: &Path,
        root: &Path,
        tag: Option<&str>,
    ) -> Result<IngestOutcome, ServiceError> {
        self.ingest.ingest_file(path, root, tag)
    }

    pub fn ingest_folder(
        &self,
        folder: &Path,
        tag: Option<&str>,
        recursive: bool,
    ) -> Result<BatchReport, ServiceError> {
        self.ingest.ingest_folder(folder, tag, recursive)
    }

    pub fn search(&self, image: &[u8], request: &SearchRequest) -> Result<SearchOutcome, ServiceError> {
        self.search.search_image(image, request)
    }

    pub fn search_vector(
        &self,
        query: &Embedding,
        request: &SearchRequest,
    ) -> Result<SearchOutcome, ServiceError> {
        self.search.search_vector(query, request)
    }

    /// Request defaults from settings.
    pub fn default_request(&self) -> SearchRequest {
        SearchRequest::new(
            self.settings.search.default_top_k,
            self.settings.search.default_threshold,
        )
    }

    /// Take a face out of search results. Metadata is kept and the face is
    /// flagged unindexed so a rebuild puts it back.
    pub fn remove_from_index(&self, face_id: FaceId) -> Result<bool, ServiceError> {
        let removed = self.index.remove(face_id)?;
        if self.store.get_face(face_id)?.is_some() {
            self.store.set_face_indexed(face_id, false)?;
        }
        info!(face_id, removed, "Removed face from index");
        Ok(removed)
    }

    /// Delete a photo, its faces and their index entries.
    ///
    /// Returns `false` when the photo does not exist. A broken index
    /// surfaces as an error after the metadata is gone; search never
    /// returns the orphaned entries.
    pub fn remove_photo(&self, photo_id: &str) -> Result<bool, ServiceError> {
        let Some(face_ids) = self.store.delete_photo_and_faces(photo_id)? else {
            return Ok(false);
        };
        for &face_id in &face_ids {
            if let Err(err) = self.index.remove(face_id) {
                error!(photo_id, face_id, error = %err, "Index removal failed after photo delete");
                return Err(err.into());
            }
        }
        info!(photo_id, faces = face_ids.len(), "Removed photo");
        Ok(true)
    }

    pub fn get_photo(&self, photo_id: &str) -> Result<Option<PhotoRecord>, ServiceError> {
        Ok(self.store.get_photo(photo_id)?)
    }

    pub fn list_photos(
        &self,
        page: usize,
        page_size: usize,
        tag: Option<&str>,
    ) -> Result<PhotoPage, ServiceError> {
        Ok(self.store.list_photos_page(page, page_size, tag)?)
    }

    pub fn stats(&self) -> Result<ServiceStats, ServiceError> {
        Ok(ServiceStats {
            photos: self.store.stats()?,
            index: self.index.stats(),
        })
    }

    pub fn rebuild(&self) -> Result<RebuildReport, ServiceError> {
        rebuild_index(self.store.as_ref(), self.index.as_ref())
    }

    pub fn reconcile(&self) -> Result<ReconcileReport, ServiceError> {
        reconcile(self.store.as_ref(), self.index.as_ref())
    }

    /// Check the graph's structural invariants.
    pub fn validate_index(&self) -> Result<(), ServiceError> {
        Ok(self.index.validate()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{raw_face, Fixture, StuckIndex};
    use photomatch_embeddings::PrecomputedDetector;

    fn engine(fx: &Fixture) -> PhotoMatch {
        PhotoMatch::with_parts(
            (*fx.settings).clone(),
            fx.store.clone(),
            fx.index.clone(),
            fx.detector.clone(),
        )
    }

    fn created(outcome: IngestOutcome) -> (String, FaceId) {
        match outcome {
            IngestOutcome::Created { photo_id, face_id, .. } => (photo_id, face_id),
            other => panic!("expected created, got {other:?}"),
        }
    }

    #[test]
    fn test_open_rebuilds_from_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings {
            db_path: dir.path().join("db").to_string_lossy().to_string(),
            embedding_dim: 2,
            ..Settings::default()
        };
        let detector = Arc::new(PrecomputedDetector::new(2));
        let bytes = b"image:persisted".to_vec();
        detector.register(
            &bytes,
            photomatch_embeddings::Detection::new(
                50,
                50,
                vec![raw_face([0.0, 0.0, 5.0, 5.0], vec![1.0, 0.0])],
            ),
        );

        let face_id = {
            let engine = PhotoMatch::open(settings.clone(), detector.clone()).unwrap();
            created(engine.ingest(&bytes, "p.jpg", None).unwrap()).1
        };

        let reopened = PhotoMatch::open(settings, detector).unwrap();
        assert!(reopened.index().contains(face_id));
        assert_eq!(reopened.stats().unwrap().index.vector_count, 1);
    }

    #[test]
    fn test_open_rejects_detector_dimension() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings {
            db_path: dir.path().join("db").to_string_lossy().to_string(),
            embedding_dim: 2,
            ..Settings::default()
        };
        let result = PhotoMatch::open(settings, Arc::new(PrecomputedDetector::new(3)));
        assert!(matches!(result, Err(ServiceError::InvalidArgument(_))));
    }

    #[test]
    fn test_remove_from_index_keeps_metadata() {
        let fx = Fixture::with_dimension(2);
        let engine = engine(&fx);
        let bytes = fx.image("a", vec![raw_face([0.0, 0.0, 5.0, 5.0], vec![1.0, 0.0])]);
        let (photo_id, face_id) = created(engine.ingest(&bytes, "a.jpg", None).unwrap());

        assert!(engine.remove_from_index(face_id).unwrap());
        assert!(!engine.index().contains(face_id));
        assert!(engine.get_photo(&photo_id).unwrap().is_some());
        assert!(!fx.store.get_face(face_id).unwrap().unwrap().indexed);

        // Unknown ids are a no-op
        assert!(!engine.remove_from_index(face_id).unwrap());

        engine.rebuild().unwrap();
        assert!(engine.index().contains(face_id));
    }

    #[test]
    fn test_remove_photo_drops_index_entries() {
        let fx = Fixture::with_dimension(2);
        let engine = engine(&fx);
        let bytes = fx.image("a", vec![raw_face([0.0, 0.0, 5.0, 5.0], vec![1.0, 0.0])]);
        let (photo_id, face_id) = created(engine.ingest(&bytes, "a.jpg", None).unwrap());

        assert!(engine.remove_photo(&photo_id).unwrap());
        assert!(!engine.index().contains(face_id));
        assert!(engine.get_photo(&photo_id).unwrap().is_none());
        assert!(!engine.remove_photo(&photo_id).unwrap());
        engine.validate_index().unwrap();
    }

    #[test]
    fn test_remove_photo_surfaces_broken_index() {
        let fx = Fixture::with_dimension(2);
        let engine = PhotoMatch::with_parts(
            (*fx.settings).clone(),
            fx.store.clone(),
            Arc::new(StuckIndex::new(fx.index.clone())),
            fx.detector.clone(),
        );
        let bytes = fx.image("a", vec![raw_face([0.0, 0.0, 5.0, 5.0], vec![1.0, 0.0])]);
        let (photo_id, face_id) = created(engine.ingest(&bytes, "a.jpg", None).unwrap());

        let err = engine.remove_photo(&photo_id).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, ServiceError::Vector(_)));
        // Metadata is already gone, so search cannot resurface the face
        assert!(engine.get_photo(&photo_id).unwrap().is_none());
        let outcome = engine
            .search_vector(
                &Embedding::new(vec![1.0, 0.0]).unwrap(),
                &SearchRequest::new(5, 0.0),
            )
            .unwrap();
        assert!(outcome.results.iter().all(|r| r.face_id != face_id));
    }

    #[test]
    fn test_list_and_stats() {
        let fx = Fixture::with_dimension(2);
        let engine = engine(&fx);
        for (i, tag) in ["gala", "gala", "picnic"].iter().enumerate() {
            let bytes = fx.image(&format!("p{i}"), vec![raw_face([0.0, 0.0, 5.0, 5.0], vec![1.0, i as f32])]);
            engine.ingest(&bytes, &format!("p{i}.jpg"), Some(tag)).unwrap();
        }

        let page = engine.list_photos(1, 2, Some("gala")).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.photos.len(), 2);

        let stats = engine.stats().unwrap();
        assert_eq!(stats.photos.total_photos, 3);
        assert_eq!(stats.photos.primary_faces, 3);
        assert_eq!(stats.index.vector_count, 3);
    }
}
