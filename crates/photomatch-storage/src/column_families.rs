//! Column family definitions for RocksDB.
//!
//! - photos: photo records keyed by ULID (lexicographic = creation order)
//! - faces: face records keyed by big-endian face id
//! - photo_hashes: content hash -> photo id (dedup table)
//! - photo_faces: `{photo_id}:{face_id}` -> empty (faces of a photo)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for photo records
pub const CF_PHOTOS: &str = "photos";

/// Column family name for face records (embeddings included)
pub const CF_FACES: &str = "faces";

/// Column family name for the content hash dedup table
pub const CF_PHOTO_HASHES: &str = "photo_hashes";

/// Column family name for photo -> face links
pub const CF_PHOTO_FACES: &str = "photo_faces";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_PHOTOS, CF_FACES, CF_PHOTO_HASHES, CF_PHOTO_FACES];

/// Face records carry 512 floats each; compress them.
fn faces_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_PHOTOS, Options::default()),
        ColumnFamilyDescriptor::new(CF_FACES, faces_options()),
        ColumnFamilyDescriptor::new(CF_PHOTO_HASHES, Options::default()),
        ColumnFamilyDescriptor::new(CF_PHOTO_FACES, Options::default()),
    ]
}
