//! Detector backed by precomputed detections.
//!
//! The face model runs outside this process. Its output for an image is
//! either registered directly (tests, embedding hosts) or read from a JSON
//! sidecar next to the image, `photo.jpg` -> `photo.jpg.faces.json`.
//! Lookups are keyed by content hash, so a renamed copy of the same bytes
//! resolves to the same detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use photomatch_types::content_hash;
use tracing::debug;

use crate::detector::{Detection, DetectorInfo, FaceDetector};
use crate::error::EmbeddingError;

/// File suffix appended to an image path to find its detections.
pub const SIDECAR_SUFFIX: &str = ".faces.json";

/// Sidecar path for an image.
pub fn sidecar_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_os_string();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

/// Detector that answers from a registry of known detections.
pub struct PrecomputedDetector {
    info: DetectorInfo,
    detections: RwLock<HashMap<String, Detection>>,
}

impl PrecomputedDetector {
    pub fn new(dimension: usize) -> Self {
        Self {
            info: DetectorInfo {
                name: "precomputed".to_string(),
                dimension,
            },
            detections: RwLock::new(HashMap::new()),
        }
    }

    /// Register the detection for the given image bytes.
    pub fn register(&self, image: &[u8], detection: Detection) {
        let hash = content_hash(image);
        self.detections.write().insert(hash, detection);
    }

    /// Load `<image>.faces.json` for an image and register it.
    ///
    /// Returns `false` when no sidecar exists.
    pub fn load_sidecar(&self, image_path: &Path, image: &[u8]) -> Result<bool, EmbeddingError> {
        let path = sidecar_path(image_path);
        if !path.exists() {
            return Ok(false);
        }
        let raw = std::fs::read(&path)?;
        let detection: Detection = serde_json::from_slice(&raw)?;
        debug!(path = %path.display(), faces = detection.faces.len(), "Loaded detection sidecar");
        self.register(image, detection);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.detections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FaceDetector for PrecomputedDetector {
    fn info(&self) -> &DetectorInfo {
        &self.info
    }

    fn detect(&self, image: &[u8]) -> Result<Detection, EmbeddingError> {
        if image.is_empty() {
            return Err(EmbeddingError::InvalidImage("empty image".to_string()));
        }
        let hash = content_hash(image);
        self.detections
            .read()
            .get(&hash)
            .cloned()
            .ok_or_else(|| {
                EmbeddingError::InvalidImage(format!("no detection available for image {hash}"))
            })
    }
}
