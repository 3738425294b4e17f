//! Face records.
//!
//! A face is one detected bounding box inside a photo together with its
//! L2-normalized embedding. Each photo has at most one primary face, and
//! only primary faces are placed in the vector index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::photo::PhotoRecord;

/// Identifier of a face; also the key of its vector index entry.
pub type FaceId = u64;

/// Integer bounding box in pixel coordinates: `(x1, y1)` top-left,
/// `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build a box from detector coordinates, truncating toward zero.
    pub fn from_raw(raw: [f32; 4]) -> Self {
        Self {
            x1: raw[0] as i32,
            y1: raw[1] as i32,
            x2: raw[2] as i32,
            y2: raw[3] as i32,
        }
    }

    pub fn width(&self) -> i64 {
        (i64::from(self.x2) - i64::from(self.x1)).max(0)
    }

    pub fn height(&self) -> i64 {
        (i64::from(self.y2) - i64::from(self.y1)).max(0)
    }

    /// Box area `(x2-x1)*(y2-y1)`. Inverted boxes have zero area.
    pub fn area(&self) -> i64 {
        self.width() * self.height()
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

/// A face about to be written to the metadata store.
///
/// The store assigns the [`FaceId`] and creation timestamp.
#[derive(Debug, Clone)]
pub struct NewFace {
    pub photo_id: String,
    pub bbox: BoundingBox,
    /// Unit-length embedding
    pub embedding: Vec<f32>,
    pub is_primary: bool,
}

impl NewFace {
    pub fn new(
        photo_id: impl Into<String>,
        bbox: BoundingBox,
        embedding: Vec<f32>,
        is_primary: bool,
    ) -> Self {
        Self {
            photo_id: photo_id.into(),
            bbox,
            embedding,
            is_primary,
        }
    }
}

/// A persisted face.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    /// Store-assigned identifier (index key)
    pub face_id: FaceId,

    /// Owning photo
    pub photo_id: String,

    pub bbox: BoundingBox,

    /// Unit-length embedding
    pub embedding: Vec<f32>,

    /// Whether this is the photo's primary (indexed) face
    pub is_primary: bool,

    /// False when the index insert failed and the face must be excluded
    /// from search until the next rebuild.
    #[serde(default = "default_indexed")]
    pub indexed: bool,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

fn default_indexed() -> bool {
    true
}

impl FaceRecord {
    /// Materialize a new face with the given id.
    pub fn from_new(face_id: FaceId, face: NewFace) -> Self {
        Self {
            face_id,
            photo_id: face.photo_id,
            bbox: face.bbox,
            embedding: face.embedding,
            is_primary: face.is_primary,
            indexed: face.is_primary,
            created_at: Utc::now(),
        }
    }

    /// Embedding dimension
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A face id resolved back to its face and owning photo.
#[derive(Debug, Clone)]
pub struct ResolvedFace {
    pub face: FaceRecord,
    pub photo: PhotoRecord,
}
