//! Metadata store for PhotoMatch.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for photos, faces and lookup tables
//! - Content-hash dedup table owned by the store
//! - Atomic multi-key writes via WriteBatch
//! - Newest-first photo pagination over ULID keys
//!
//! The store is the source of truth for which photos and faces exist.
//! The vector index is derived from it and can be rebuilt at any time.

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod store;

pub use db::PhotoStore;
pub use error::StorageError;
pub use keys::{FaceKey, PhotoFaceKey, PhotoKey};
pub use store::MetadataStore;
