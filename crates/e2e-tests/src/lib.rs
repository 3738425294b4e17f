//! End-to-end test infrastructure for PhotoMatch.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the full ingest-to-search pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;

use photomatch_embeddings::{DetectedFace, Detection, PrecomputedDetector};
use photomatch_service::{IngestOutcome, PhotoMatch};
use photomatch_types::{FaceId, Settings};

/// Shared test harness for E2E tests.
///
/// Owns a temp RocksDB directory, a precomputed detector and an opened
/// [`PhotoMatch`] engine.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub settings: Settings,
    pub engine: Arc<PhotoMatch>,
    pub detector: Arc<PrecomputedDetector>,
}

impl TestHarness {
    /// Harness with the given embedding dimension and a fixed index seed.
    pub fn new(dimension: usize) -> Self {
        Self::with_settings(|settings| settings.embedding_dim = dimension)
    }

    /// Harness with settings adjusted by `configure`.
    pub fn with_settings(configure: impl FnOnce(&mut Settings)) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let mut settings = Settings {
            db_path: temp_dir.path().join("db").to_string_lossy().to_string(),
            ..Settings::default()
        };
        settings.index.seed = Some(7);
        configure(&mut settings);

        let detector = Arc::new(PrecomputedDetector::new(settings.embedding_dim));
        let engine = PhotoMatch::open(settings.clone(), detector.clone())
            .expect("Failed to open test engine");

        Self {
            _temp_dir: temp_dir,
            settings,
            engine: Arc::new(engine),
            detector,
        }
    }

    /// Close the engine and open it again on the same store, as a restart
    /// would. All other clones of `engine` must be dropped first.
    pub fn reopen(self) -> Self {
        let Self {
            _temp_dir,
            settings,
            engine,
            detector,
        } = self;
        drop(engine);
        let engine = PhotoMatch::open(settings.clone(), detector.clone())
            .expect("Failed to reopen test engine");
        Self {
            _temp_dir,
            settings,
            engine: Arc::new(engine),
            detector,
        }
    }

    /// Register fake image bytes whose detection is `faces`.
    pub fn image(&self, name: &str, faces: Vec<DetectedFace>) -> Vec<u8> {
        let bytes = format!("jpeg:{name}").into_bytes();
        self.detector.register(&bytes, Detection::new(640, 480, faces));
        bytes
    }

    /// Ingest a one-face image and return its ids.
    pub fn ingest_face(&self, name: &str, vector: Vec<f32>, tag: Option<&str>) -> (String, FaceId) {
        let bytes = self.image(name, vec![face(20.0, vector)]);
        match self
            .engine
            .ingest(&bytes, &format!("{name}.jpg"), tag)
            .expect("ingest failed")
        {
            IngestOutcome::Created {
                photo_id, face_id, ..
            } => (photo_id, face_id),
            other => panic!("expected Created for {name}, got {other:?}"),
        }
    }

    /// Folder inside the harness temp dir.
    pub fn folder(&self, name: &str) -> PathBuf {
        let path = self._temp_dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create folder");
        path
    }
}

/// A square face box of side `size` at the origin.
pub fn face(size: f32, vector: Vec<f32>) -> DetectedFace {
    DetectedFace::new([0.0, 0.0, size, size], vector)
}

/// Uniformly random direction in `dimension` space.
pub fn random_vector(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect()
}

/// `base` plus small noise; stays close in cosine terms.
pub fn perturb(rng: &mut StdRng, base: &[f32], noise: f32) -> Vec<f32> {
    base.iter()
        .map(|v| v + rng.random_range(-noise..noise))
        .collect()
}
