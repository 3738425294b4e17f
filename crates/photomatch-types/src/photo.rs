//! Photo records.
//!
//! A photo is created once per unique image (by content hash) and is never
//! mutated afterwards. Photo ids are ULIDs, so their lexicographic order is
//! their creation order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A photo about to be written to the metadata store.
#[derive(Debug, Clone)]
pub struct NewPhoto {
    /// Storage path (relative to the images folder when possible)
    pub path: String,
    /// Hex-encoded content hash of the raw image bytes
    pub content_hash: String,
    pub width: u32,
    pub height: u32,
    /// Optional event tag
    pub tag: Option<String>,
}

impl NewPhoto {
    pub fn new(
        path: impl Into<String>,
        content_hash: impl Into<String>,
        width: u32,
        height: u32,
        tag: Option<String>,
    ) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
            width,
            height,
            tag,
        }
    }
}

/// A persisted photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Unique identifier (ULID string)
    pub photo_id: String,

    pub path: String,

    /// Unique content hash used for deduplication
    pub content_hash: String,

    pub width: u32,
    pub height: u32,

    #[serde(default)]
    pub tag: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl PhotoRecord {
    /// Materialize a new photo with a fresh ULID and the current time.
    pub fn from_new(photo: NewPhoto) -> Self {
        let ulid = Ulid::new();
        let created_at = DateTime::<Utc>::from_timestamp_millis(ulid.timestamp_ms() as i64)
            .unwrap_or_else(Utc::now);
        Self {
            photo_id: ulid.to_string(),
            path: photo.path,
            content_hash: photo.content_hash,
            width: photo.width,
            height: photo.height,
            tag: photo.tag,
            created_at,
        }
    }

    /// Whether this photo carries the given tag. `None` matches everything.
    pub fn matches_tag(&self, tag: Option<&str>) -> bool {
        match tag {
            None => true,
            Some(wanted) => self.tag.as_deref() == Some(wanted),
        }
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

/// One page of a photo listing.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoPage {
    pub photos: Vec<PhotoRecord>,
    /// Total photos matching the filter
    pub total: usize,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
}

impl PhotoPage {
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(self.page_size)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

/// Aggregate counts over the metadata store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhotoStats {
    pub total_photos: usize,
    pub total_faces: usize,
    pub primary_faces: usize,
    /// Distinct tags, sorted
    pub tags: Vec<String>,
}
