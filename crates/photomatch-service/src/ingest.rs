//! Ingestion coordinator.
//!
//! Turns image bytes plus detector output into a photo, its faces and one
//! index entry. Order of work for a single image:
//! 1. Content-hash dedup against the store
//! 2. Detection and primary-face selection (largest box, first on ties)
//! 3. Normalization of the primary vector, before anything is written
//! 4. Photo + face metadata, then the index insert
//!
//! A failed index insert rolls the metadata back. If the rollback itself
//! fails the face is flagged unindexed so search skips it until a rebuild.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use photomatch_embeddings::{normalize, DetectedFace, Detection, Embedding, EmbeddingError, FaceDetector};
use photomatch_storage::{MetadataStore, StorageError};
use photomatch_types::{content_hash, FaceId, IngestSettings, NewFace, NewPhoto};
use photomatch_vector::VectorIndex;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::ServiceError;

/// Image extensions picked up by folder ingestion.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "tiff", "webp"];

/// Result of ingesting one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Photo, primary face and index entry were created
    Created {
        photo_id: String,
        face_id: FaceId,
        faces_detected: usize,
    },
    /// Byte-identical image already stored; nothing was written
    Duplicate { photo_id: String },
    /// No usable face. `photo_id` is set when faceless photos are kept.
    NoFaceDetected { photo_id: Option<String> },
    /// Per-item input failure (unreadable or undecodable image)
    Failed { reason: String },
}

impl IngestOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, IngestOutcome::Created { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Created { .. } => "created",
            IngestOutcome::Duplicate { .. } => "duplicate",
            IngestOutcome::NoFaceDetected { .. } => "no_face",
            IngestOutcome::Failed { .. } => "failed",
        }
    }
}

/// Outcome of one file in a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub path: String,
    pub outcome: IngestOutcome,
}

/// Per-item outcomes plus counters for a batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItem>,
    /// Photos created with an indexed face
    pub processed: usize,
    /// Duplicates
    pub skipped: usize,
    /// Images without a usable face
    pub no_face: usize,
    /// Per-item failures
    pub errors: usize,
}

impl BatchReport {
    pub fn record(&mut self, path: impl Into<String>, outcome: IngestOutcome) {
        match &outcome {
            IngestOutcome::Created { .. } => self.processed += 1,
            IngestOutcome::Duplicate { .. } => self.skipped += 1,
            IngestOutcome::NoFaceDetected { .. } => self.no_face += 1,
            IngestOutcome::Failed { .. } => self.errors += 1,
        }
        self.items.push(BatchItem {
            path: path.into(),
            outcome,
        });
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}

/// Index of the primary face: largest box area, first in scan order on ties.
pub fn select_primary(faces: &[DetectedFace]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, face) in faces.iter().enumerate() {
        let area = face.area();
        if best.map_or(true, |(_, best_area)| area.total_cmp(&best_area).is_gt()) {
            best = Some((i, area));
        }
    }
    best.map(|(i, _)| i)
}

/// Sorted list of supported images under `folder`.
pub fn collect_images(folder: &Path, recursive: bool) -> Result<Vec<PathBuf>, ServiceError> {
    if !folder.is_dir() {
        return Err(ServiceError::InvalidArgument(format!(
            "{} is not a directory",
            folder.display()
        )));
    }
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut paths = Vec::new();
    for entry in WalkDir::new(folder).max_depth(max_depth) {
        let entry = entry.map_err(|e| ServiceError::Io(e.into()))?;
        if entry.file_type().is_file() && is_supported_image(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Path stored for an image: relative to `root` when it lives under it.
pub fn storage_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Coordinates dedup, face selection, metadata writes and index inserts.
pub struct IngestCoordinator {
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    detector: Arc<dyn FaceDetector>,
    settings: IngestSettings,
    dimension: usize,
}

impl IngestCoordinator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        detector: Arc<dyn FaceDetector>,
        settings: IngestSettings,
        dimension: usize,
    ) -> Self {
        Self {
            store,
            index,
            detector,
            settings,
            dimension,
        }
    }

    /// Ingest one image.
    ///
    /// Input problems come back as [`IngestOutcome::Failed`]; store, index
    /// and invariant failures come back as errors.
    pub fn ingest(
        &self,
        image: &[u8],
        path: &str,
        tag: Option<&str>,
    ) -> Result<IngestOutcome, ServiceError> {
        let hash = content_hash(image);
        if let Some(existing) = self.store.find_photo_by_hash(&hash)? {
            debug!(path, photo_id = %existing.photo_id, "Duplicate image skipped");
            return Ok(IngestOutcome::Duplicate {
                photo_id: existing.photo_id,
            });
        }

        let detection = match self.detector.detect(image) {
            Ok(detection) => detection,
            Err(err) if err.is_input_error() => {
                warn!(path, error = %err, "Image rejected");
                return Ok(IngestOutcome::Failed {
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let faces_detected = detection.faces.len();

        let Some((primary, embedding)) = self.usable_primary(&detection, path)? else {
            return self.store_faceless(&detection, hash, path, tag);
        };

        let new_photo = NewPhoto::new(
            path,
            hash,
            detection.width,
            detection.height,
            tag.map(str::to_string),
        );
        let photo = match self.store.create_photo(new_photo) {
            Ok(photo) => photo,
            // Lost a race with another worker ingesting the same bytes
            Err(StorageError::DuplicateHash { photo_id, .. }) => {
                return Ok(IngestOutcome::Duplicate { photo_id });
            }
            Err(err) => return Err(err.into()),
        };

        let face_id = match self.write_faces(&photo.photo_id, &detection, primary, &embedding) {
            Ok(face_id) => face_id,
            Err(err) => {
                self.rollback(&photo.photo_id, None);
                return Err(err);
            }
        };

        if let Err(err) = self.index.insert(face_id, &embedding) {
            error!(path, face_id, error = %err, "Index insert failed, rolling back");
            self.rollback(&photo.photo_id, Some(face_id));
            return Err(err.into());
        }

        info!(path, photo_id = %photo.photo_id, face_id, faces = faces_detected, "Ingested photo");
        Ok(IngestOutcome::Created {
            photo_id: photo.photo_id,
            face_id,
            faces_detected,
        })
    }

    /// Read and ingest one file; unreadable files are per-item failures.
    pub fn ingest_file(
        &self,
        path: &Path,
        root: &Path,
        tag: Option<&str>,
    ) -> Result<IngestOutcome, ServiceError> {
        let image = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Cannot read image");
                return Ok(IngestOutcome::Failed {
                    reason: format!("cannot read {}: {}", path.display(), err),
                });
            }
        };
        self.ingest(&image, &storage_path(path, root), tag)
    }

    /// Ingest files one after another. Continues past per-item failures,
    /// stops at the first fatal error.
    pub fn ingest_paths(
        &self,
        paths: &[PathBuf],
        root: &Path,
        tag: Option<&str>,
    ) -> Result<BatchReport, ServiceError> {
        let mut report = BatchReport::default();
        for path in paths {
            let display = storage_path(path, root);
            match self.ingest_file(path, root, tag) {
                Ok(outcome) => report.record(display, outcome),
                Err(err) if err.is_fatal() => {
                    error!(path = %display, error = %err, "Fatal error, halting batch");
                    return Err(err);
                }
                Err(err) => {
                    warn!(path = %display, error = %err, "Ingest failed");
                    report.record(
                        display,
                        IngestOutcome::Failed {
                            reason: err.to_string(),
                        },
                    );
                }
            }
        }
        info!(
            processed = report.processed,
            skipped = report.skipped,
            no_face = report.no_face,
            errors = report.errors,
            "Batch ingest complete"
        );
        Ok(report)
    }

    /// Ingest every supported image in a folder.
    pub fn ingest_folder(
        &self,
        folder: &Path,
        tag: Option<&str>,
        recursive: bool,
    ) -> Result<BatchReport, ServiceError> {
        let paths = collect_images(folder, recursive)?;
        info!(folder = %folder.display(), images = paths.len(), "Ingesting folder");
        self.ingest_paths(&paths, folder, tag)
    }

    /// Primary face and its normalized vector, or `None` when there is no
    /// usable face. A wrong vector length is an integration error.
    fn usable_primary(
        &self,
        detection: &Detection,
        path: &str,
    ) -> Result<Option<(usize, Embedding)>, ServiceError> {
        let Some(primary) = select_primary(&detection.faces) else {
            debug!(path, "No faces detected");
            return Ok(None);
        };
        let raw = &detection.faces[primary].embedding;
        self.check_dimension(raw.len(), path)?;
        match normalize(raw.clone()) {
            Ok(values) => Ok(Some((primary, Embedding::from_normalized(values)))),
            Err(err) => {
                debug!(path, error = %err, "Primary face vector unusable");
                Ok(None)
            }
        }
    }

    fn check_dimension(&self, actual: usize, path: &str) -> Result<(), ServiceError> {
        if actual != self.dimension {
            error!(path, expected = self.dimension, actual, "Detector vector has wrong dimension");
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual,
            }
            .into());
        }
        Ok(())
    }

    fn store_faceless(
        &self,
        detection: &Detection,
        hash: String,
        path: &str,
        tag: Option<&str>,
    ) -> Result<IngestOutcome, ServiceError> {
        if !self.settings.store_faceless_photos {
            return Ok(IngestOutcome::NoFaceDetected { photo_id: None });
        }
        let new_photo = NewPhoto::new(
            path,
            hash,
            detection.width,
            detection.height,
            tag.map(str::to_string),
        );
        match self.store.create_photo(new_photo) {
            Ok(photo) => {
                info!(path, photo_id = %photo.photo_id, "Stored photo without a usable face");
                Ok(IngestOutcome::NoFaceDetected {
                    photo_id: Some(photo.photo_id),
                })
            }
            Err(StorageError::DuplicateHash { photo_id, .. }) => {
                Ok(IngestOutcome::Duplicate { photo_id })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Persist the primary face (and secondary faces when enabled).
    fn write_faces(
        &self,
        photo_id: &str,
        detection: &Detection,
        primary: usize,
        embedding: &Embedding,
    ) -> Result<FaceId, ServiceError> {
        let face = &detection.faces[primary];
        let record = self.store.create_face(NewFace::new(
            photo_id,
            face.bounding_box(),
            embedding.values.clone(),
            true,
        ))?;

        if self.settings.store_secondary_faces {
            for (i, other) in detection.faces.iter().enumerate() {
                if i == primary || other.embedding.len() != self.dimension {
                    continue;
                }
                let Ok(values) = normalize(other.embedding.clone()) else {
                    continue;
                };
                self.store.create_face(NewFace::new(
                    photo_id,
                    other.bounding_box(),
                    values,
                    false,
                ))?;
            }
        }
        Ok(record.face_id)
    }

    /// Undo a partially ingested photo. Falls back to flagging the face
    /// unindexed when the delete fails.
    fn rollback(&self, photo_id: &str, face_id: Option<FaceId>) {
        match self.store.delete_photo_and_faces(photo_id) {
            Ok(_) => debug!(photo_id, "Rolled back photo"),
            Err(err) => {
                error!(photo_id, error = %err, "Rollback failed");
                if let Some(face_id) = face_id {
                    if let Err(err) = self.store.set_face_indexed(face_id, false) {
                        error!(photo_id, face_id, error = %err, "Could not flag face as unindexed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{raw_face, Fixture};

    #[test]
    fn test_select_primary_largest_area() {
        let faces = vec![
            raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.0, 0.0, 0.0]),
            raw_face([0.0, 0.0, 20.0, 20.0], vec![0.0, 1.0, 0.0, 0.0]),
        ];
        assert_eq!(select_primary(&faces), Some(1));
    }

    #[test]
    fn test_select_primary_ties_keep_first() {
        let faces = vec![
            raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.0, 0.0, 0.0]),
            raw_face([5.0, 5.0, 15.0, 15.0], vec![0.0, 1.0, 0.0, 0.0]),
        ];
        assert_eq!(select_primary(&faces), Some(0));
        assert_eq!(select_primary(&[]), None);
    }

    #[test]
    fn test_select_primary_compares_unrounded_areas() {
        // Both truncate to a 10x10 box; the second is larger before rounding
        let faces = vec![
            raw_face([0.0, 0.0, 10.1, 10.1], vec![1.0, 0.0, 0.0, 0.0]),
            raw_face([0.0, 0.0, 10.9, 10.9], vec![0.0, 1.0, 0.0, 0.0]),
        ];
        assert_eq!(faces[0].bounding_box().area(), faces[1].bounding_box().area());
        assert_eq!(select_primary(&faces), Some(1));
    }

    #[test]
    fn test_ingest_creates_photo_face_and_entry() {
        let fx = Fixture::new();
        let bytes = fx.image("one", vec![raw_face([0.0, 0.0, 10.0, 10.0], vec![3.0, 4.0, 0.0, 0.0])]);

        let outcome = fx.coordinator().ingest(&bytes, "one.jpg", Some("gala")).unwrap();
        let IngestOutcome::Created { photo_id, face_id, faces_detected } = outcome else {
            panic!("expected created, got {outcome:?}");
        };
        assert_eq!(faces_detected, 1);
        assert!(fx.index.contains(face_id));

        let face = fx.store.get_face(face_id).unwrap().unwrap();
        assert!(face.is_primary);
        assert!((face.embedding[0] - 0.6).abs() < 1e-6);
        let photo = fx.store.get_photo(&photo_id).unwrap().unwrap();
        assert_eq!(photo.tag.as_deref(), Some("gala"));
        assert_eq!(photo.path, "one.jpg");
    }

    #[test]
    fn test_duplicate_bytes_are_skipped() {
        let fx = Fixture::new();
        let bytes = fx.image("dup", vec![raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.0, 0.0, 0.0])]);
        let coordinator = fx.coordinator();

        let first = coordinator.ingest(&bytes, "a.jpg", None).unwrap();
        let second = coordinator.ingest(&bytes, "copy-of-a.jpg", None).unwrap();
        let IngestOutcome::Created { photo_id, .. } = first else {
            panic!("expected created");
        };
        assert_eq!(second, IngestOutcome::Duplicate { photo_id });
        assert_eq!(fx.store.stats().unwrap().total_photos, 1);
        assert_eq!(fx.index.len(), 1);
    }

    #[test]
    fn test_primary_face_is_the_largest() {
        let fx = Fixture::new();
        let bytes = fx.image(
            "two-faces",
            vec![
                raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.0, 0.0, 0.0]),
                raw_face([0.0, 0.0, 20.0, 20.0], vec![0.0, 1.0, 0.0, 0.0]),
            ],
        );
        let outcome = fx.coordinator().ingest(&bytes, "two.jpg", None).unwrap();
        let IngestOutcome::Created { face_id, .. } = outcome else {
            panic!("expected created");
        };
        let face = fx.store.get_face(face_id).unwrap().unwrap();
        assert_eq!(face.bbox.area(), 400);
        assert_eq!(face.embedding, vec![0.0, 1.0, 0.0, 0.0]);
        assert_eq!(fx.store.stats().unwrap().total_faces, 1);
    }

    #[test]
    fn test_secondary_faces_stored_but_not_indexed() {
        let fx = Fixture::with_ingest(IngestSettings {
            store_secondary_faces: true,
            ..Default::default()
        });
        let bytes = fx.image(
            "group",
            vec![
                raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.0, 0.0, 0.0]),
                raw_face([0.0, 0.0, 20.0, 20.0], vec![0.0, 1.0, 0.0, 0.0]),
                raw_face([0.0, 0.0, 5.0, 5.0], vec![0.0; 4]),
            ],
        );
        let outcome = fx.coordinator().ingest(&bytes, "group.jpg", None).unwrap();
        let IngestOutcome::Created { photo_id, .. } = outcome else {
            panic!("expected created");
        };
        let faces = fx.store.faces_for_photo(&photo_id).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces.iter().filter(|f| f.is_primary).count(), 1);
        assert_eq!(fx.index.len(), 1);
    }

    #[test]
    fn test_no_face_creates_nothing() {
        let fx = Fixture::new();
        let bytes = fx.image("empty", vec![]);
        let outcome = fx.coordinator().ingest(&bytes, "empty.jpg", None).unwrap();
        assert_eq!(outcome, IngestOutcome::NoFaceDetected { photo_id: None });
        assert_eq!(fx.store.stats().unwrap().total_photos, 0);
        assert!(fx.index.is_empty());
    }

    #[test]
    fn test_degenerate_vector_is_no_face() {
        let fx = Fixture::with_ingest(IngestSettings {
            store_faceless_photos: true,
            ..Default::default()
        });
        let bytes = fx.image("zero", vec![raw_face([0.0, 0.0, 10.0, 10.0], vec![0.0; 4])]);
        let outcome = fx.coordinator().ingest(&bytes, "zero.jpg", None).unwrap();
        let IngestOutcome::NoFaceDetected { photo_id: Some(photo_id) } = outcome else {
            panic!("expected stored faceless photo, got {outcome:?}");
        };
        assert!(fx.store.faces_for_photo(&photo_id).unwrap().is_empty());
        assert!(fx.index.is_empty());
    }

    #[test]
    fn test_undecodable_image_is_failed_outcome() {
        let fx = Fixture::new();
        let outcome = fx.coordinator().ingest(b"garbage", "bad.jpg", None).unwrap();
        assert!(matches!(outcome, IngestOutcome::Failed { .. }));
        assert_eq!(outcome.label(), "failed");
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let fx = Fixture::new();
        let bytes = fx.image("wide", vec![raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0; 8])]);
        let err = fx.coordinator().ingest(&bytes, "wide.jpg", None).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(fx.store.stats().unwrap().total_photos, 0);
    }

    #[test]
    fn test_failed_index_insert_rolls_back_metadata() {
        let fx = Fixture::new();
        let bytes = fx.image("rollback", vec![raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.0, 0.0, 0.0])]);
        let coordinator = IngestCoordinator::new(
            fx.store.clone(),
            Arc::new(crate::test_support::RejectingIndex::new(4)),
            fx.detector.clone(),
            IngestSettings::default(),
            4,
        );

        let err = coordinator.ingest(&bytes, "rollback.jpg", None).unwrap_err();
        assert!(matches!(err, ServiceError::Vector(_)));
        let stats = fx.store.stats().unwrap();
        assert_eq!(stats.total_photos, 0);
        assert_eq!(stats.total_faces, 0);
        assert!(fx.store.find_photo_by_hash(&content_hash(&bytes)).unwrap().is_none());
    }

    #[test]
    fn test_unavailable_store_is_retryable() {
        let fx = Fixture::new();
        let bytes = fx.image("down", vec![raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.0, 0.0, 0.0])]);
        let coordinator = IngestCoordinator::new(
            Arc::new(crate::test_support::UnavailableStore),
            fx.index.clone(),
            fx.detector.clone(),
            IngestSettings::default(),
            4,
        );
        let err = coordinator.ingest(&bytes, "down.jpg", None).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_ingest_folder_reports_counts() {
        let fx = Fixture::new();
        let folder = fx.dir.path().join("event");
        std::fs::create_dir_all(folder.join("nested")).unwrap();

        let face = fx.image("f1", vec![raw_face([0.0, 0.0, 10.0, 10.0], vec![1.0, 0.0, 0.0, 0.0])]);
        let empty = fx.image("f2", vec![]);
        std::fs::write(folder.join("a.jpg"), &face).unwrap();
        std::fs::write(folder.join("b.JPG"), &face).unwrap();
        std::fs::write(folder.join("c.png"), &empty).unwrap();
        std::fs::write(folder.join("d.jpg"), b"not registered").unwrap();
        std::fs::write(folder.join("notes.txt"), b"ignored").unwrap();
        std::fs::write(folder.join("nested").join("e.jpg"), &face).unwrap();

        let coordinator = fx.coordinator();
        let report = coordinator.ingest_folder(&folder, Some("gala"), false).unwrap();
        assert_eq!(report.total(), 4);
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.no_face, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.items[0].path, "a.jpg");

        let again = coordinator.ingest_folder(&folder, Some("gala"), true).unwrap();
        assert_eq!(again.total(), 5);
        assert_eq!(again.processed, 0);
        assert_eq!(again.skipped, 3);
    }

    #[test]
    fn test_storage_path() {
        let root = Path::new("/data/images");
        assert_eq!(storage_path(Path::new("/data/images/gala/1.jpg"), root), "gala/1.jpg");
        assert_eq!(storage_path(Path::new("/elsewhere/1.jpg"), root), "/elsewhere/1.jpg");
    }
}
