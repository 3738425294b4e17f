//! Face detector/embedder interface.
//!
//! Given raw image bytes, a detector returns the image dimensions and zero
//! or more face boxes, each with a raw (not yet normalized) embedding.
//! Detection is treated as a pure function: no side effects, same bytes in,
//! same faces out.

use photomatch_types::BoundingBox;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

/// Detector information
#[derive(Debug, Clone)]
pub struct DetectorInfo {
    /// Model name (e.g., "buffalo_l")
    pub name: String,
    /// Embedding dimension
    pub dimension: usize,
}

/// One detected face in scan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    /// `[x1, y1, x2, y2]` in pixels as reported by the model
    pub bbox: [f32; 4],
    /// Raw embedding vector
    pub embedding: Vec<f32>,
    /// Detection confidence, when the model reports one
    #[serde(default)]
    pub score: Option<f32>,
}

impl DetectedFace {
    pub fn new(bbox: [f32; 4], embedding: Vec<f32>) -> Self {
        Self {
            bbox,
            embedding,
            score: None,
        }
    }

    /// Box area in model coordinates, before any rounding.
    pub fn area(&self) -> f32 {
        let [x1, y1, x2, y2] = self.bbox;
        (x2 - x1) * (y2 - y1)
    }

    /// Integer bounding box of this face, as persisted.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_raw(self.bbox)
    }
}

/// Detector output for one image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    pub width: u32,
    pub height: u32,
    /// Faces in detector scan order; empty when none were found
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

impl Detection {
    pub fn new(width: u32, height: u32, faces: Vec<DetectedFace>) -> Self {
        Self {
            width,
            height,
            faces,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

/// Trait for face detectors.
///
/// Implementations must be thread-safe (Send + Sync) for concurrent use.
pub trait FaceDetector: Send + Sync {
    /// Get detector information
    fn info(&self) -> &DetectorInfo;

    /// Detect faces in raw image bytes.
    ///
    /// Undecodable input is [`EmbeddingError::InvalidImage`]; an image with
    /// no faces is `Ok` with an empty face list.
    fn detect(&self, image: &[u8]) -> Result<Detection, EmbeddingError>;
}
