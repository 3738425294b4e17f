//! # photomatch-types
//!
//! Shared domain types for the PhotoMatch face search engine.
//!
//! This crate defines the records that flow between the metadata store,
//! the ingestion coordinator and the search service:
//! - Photos: one record per unique image (deduplicated by content hash)
//! - Faces: detected face boxes with their normalized embeddings
//! - Pages: paginated photo listings
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use photomatch_types::{BoundingBox, NewPhoto};
//!
//! let photo = NewPhoto::new("events/gala/001.jpg", "ab12", 1920, 1080, None);
//! assert_eq!(BoundingBox::new(0, 0, 10, 20).area(), 200);
//! # let _ = photo;
//! ```

pub mod config;
pub mod error;
pub mod face;
pub mod hash;
pub mod photo;

pub use config::{IndexSettings, IngestSettings, SearchSettings, Settings};
pub use error::PhotoMatchError;
pub use face::{BoundingBox, FaceId, FaceRecord, NewFace, ResolvedFace};
pub use hash::content_hash;
pub use photo::{NewPhoto, PhotoPage, PhotoRecord, PhotoStats};
