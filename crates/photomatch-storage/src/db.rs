//! RocksDB wrapper for PhotoMatch metadata.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Atomic write batches (photo + hash entry, face + link)
//! - Dedup by content hash under a single writer lock
//! - Newest-first pagination and face id resolution

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use photomatch_types::{
    FaceId, FaceRecord, NewFace, NewPhoto, PhotoPage, PhotoRecord, PhotoStats, ResolvedFace,
};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};

use crate::column_families::{
    build_cf_descriptors, CF_FACES, CF_PHOTOS, CF_PHOTO_FACES, CF_PHOTO_HASHES,
};
use crate::error::StorageError;
use crate::keys::{FaceKey, PhotoFaceKey, PhotoKey};
use crate::store::MetadataStore;

/// RocksDB-backed metadata store
pub struct PhotoStore {
    db: DB,
    /// Next face id; ids start at 1 and are never reused
    face_sequence: AtomicU64,
    /// Serializes check-then-write sequences (hash dedup, primary uniqueness)
    write_lock: Mutex<()>,
}

impl PhotoStore {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening metadata store at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        let face_sequence = Self::load_face_sequence(&db)?;
        debug!(next_face_id = face_sequence, "Loaded face id sequence");

        Ok(Self {
            db,
            face_sequence: AtomicU64::new(face_sequence),
            write_lock: Mutex::new(()),
        })
    }

    /// Highest stored face id + 1
    fn load_face_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_FACES)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_FACES.to_string()))?;

        let mut iter = db.iterator_cf(&cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            return Ok(FaceKey::from_bytes(&key)?.face_id + 1);
        }
        Ok(1)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn read_photo(&self, key: &PhotoKey) -> Result<Option<PhotoRecord>, StorageError> {
        let cf = self.cf(CF_PHOTOS)?;
        match self.db.get_cf(cf, key.to_bytes())? {
            Some(bytes) => Ok(Some(PhotoRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn face_ids_for_photo(&self, photo_id: &str) -> Result<Vec<FaceId>, StorageError> {
        let cf = self.cf(CF_PHOTO_FACES)?;
        let prefix = PhotoFaceKey::prefix(photo_id);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(PhotoFaceKey::from_bytes(&key)?.face_id);
        }
        Ok(ids)
    }

    fn write_face(&self, batch: &mut WriteBatch, face: &FaceRecord) -> Result<(), StorageError> {
        let cf = self.cf(CF_FACES)?;
        batch.put_cf(cf, FaceKey::new(face.face_id).to_bytes(), face.to_bytes()?);
        Ok(())
    }

    fn scan_faces(&self) -> Result<Vec<FaceRecord>, StorageError> {
        let cf = self.cf(CF_FACES)?;
        let mut faces = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            faces.push(FaceRecord::from_bytes(&value)?);
        }
        Ok(faces)
    }
}

impl MetadataStore for PhotoStore {
    fn create_photo(&self, photo: NewPhoto) -> Result<PhotoRecord, StorageError> {
        let photos_cf = self.cf(CF_PHOTOS)?;
        let hashes_cf = self.cf(CF_PHOTO_HASHES)?;

        let _guard = self.write_lock.lock();
        if let Some(existing) = self.db.get_cf(hashes_cf, photo.content_hash.as_bytes())? {
            let photo_id = String::from_utf8_lossy(&existing).to_string();
            return Err(StorageError::DuplicateHash {
                hash: photo.content_hash,
                photo_id,
            });
        }

        let record = PhotoRecord::from_new(photo);
        let key = PhotoKey::from_photo_id(&record.photo_id)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(photos_cf, key.to_bytes(), record.to_bytes()?);
        batch.put_cf(
            hashes_cf,
            record.content_hash.as_bytes(),
            record.photo_id.as_bytes(),
        );
        self.db.write(batch)?;

        debug!(photo_id = %record.photo_id, hash = %record.content_hash, "Stored photo");
        Ok(record)
    }

    fn create_face(&self, face: NewFace) -> Result<FaceRecord, StorageError> {
        let links_cf = self.cf(CF_PHOTO_FACES)?;
        let photo_key = PhotoKey::from_photo_id(&face.photo_id)?;

        let _guard = self.write_lock.lock();
        if self.read_photo(&photo_key)?.is_none() {
            return Err(StorageError::NotFound(format!("photo {}", face.photo_id)));
        }
        if face.is_primary {
            for existing in self.faces_for_photo(&face.photo_id)? {
                if existing.is_primary {
                    return Err(StorageError::PrimaryFaceExists(face.photo_id));
                }
            }
        }

        let face_id = self.face_sequence.fetch_add(1, Ordering::SeqCst);
        let record = FaceRecord::from_new(face_id, face);

        let mut batch = WriteBatch::default();
        self.write_face(&mut batch, &record)?;
        batch.put_cf(
            links_cf,
            PhotoFaceKey::new(record.photo_id.clone(), face_id).to_bytes(),
            b"",
        );
        self.db.write(batch)?;

        debug!(face_id, photo_id = %record.photo_id, primary = record.is_primary, "Stored face");
        Ok(record)
    }

    fn find_photo_by_hash(&self, content_hash: &str) -> Result<Option<PhotoRecord>, StorageError> {
        let cf = self.cf(CF_PHOTO_HASHES)?;
        let Some(photo_id) = self.db.get_cf(cf, content_hash.as_bytes())? else {
            return Ok(None);
        };
        let key = PhotoKey::from_bytes(&photo_id)?;
        self.read_photo(&key)
    }

    fn get_photo(&self, photo_id: &str) -> Result<Option<PhotoRecord>, StorageError> {
        let key = match PhotoKey::from_photo_id(photo_id) {
            Ok(key) => key,
            // Not a ULID, so it can't be stored.
            Err(_) => return Ok(None),
        };
        self.read_photo(&key)
    }

    fn get_face(&self, face_id: FaceId) -> Result<Option<FaceRecord>, StorageError> {
        let cf = self.cf(CF_FACES)?;
        match self.db.get_cf(cf, FaceKey::new(face_id).to_bytes())? {
            Some(bytes) => Ok(Some(FaceRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn faces_for_photo(&self, photo_id: &str) -> Result<Vec<FaceRecord>, StorageError> {
        let mut faces = Vec::new();
        for face_id in self.face_ids_for_photo(photo_id)? {
            if let Some(face) = self.get_face(face_id)? {
                faces.push(face);
            }
        }
        Ok(faces)
    }

    fn delete_photo_and_faces(&self, photo_id: &str) -> Result<Option<Vec<FaceId>>, StorageError> {
        let Ok(key) = PhotoKey::from_photo_id(photo_id) else {
            return Ok(None);
        };
        let photos_cf = self.cf(CF_PHOTOS)?;
        let hashes_cf = self.cf(CF_PHOTO_HASHES)?;
        let faces_cf = self.cf(CF_FACES)?;
        let links_cf = self.cf(CF_PHOTO_FACES)?;

        let _guard = self.write_lock.lock();
        let Some(photo) = self.read_photo(&key)? else {
            return Ok(None);
        };
        let face_ids = self.face_ids_for_photo(photo_id)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(photos_cf, key.to_bytes());
        batch.delete_cf(hashes_cf, photo.content_hash.as_bytes());
        for &face_id in &face_ids {
            batch.delete_cf(faces_cf, FaceKey::new(face_id).to_bytes());
            batch.delete_cf(links_cf, PhotoFaceKey::new(photo_id, face_id).to_bytes());
        }
        self.db.write(batch)?;

        info!(photo_id, faces = face_ids.len(), "Deleted photo");
        Ok(Some(face_ids))
    }

    fn list_photos_page(
        &self,
        page: usize,
        page_size: usize,
        tag: Option<&str>,
    ) -> Result<PhotoPage, StorageError> {
        if page == 0 || page_size == 0 {
            return Err(StorageError::InvalidArgument(format!(
                "page and page_size must be >= 1 (page={page}, page_size={page_size})"
            )));
        }
        let cf = self.cf(CF_PHOTOS)?;
        let skip = (page - 1).saturating_mul(page_size);

        let mut photos = Vec::with_capacity(page_size);
        let mut total = 0usize;
        // ULID keys: reverse iteration is newest first
        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            let (_, value) = item?;
            let photo = PhotoRecord::from_bytes(&value)?;
            if !photo.matches_tag(tag) {
                continue;
            }
            if total >= skip && photos.len() < page_size {
                photos.push(photo);
            }
            total += 1;
        }

        Ok(PhotoPage {
            photos,
            total,
            page,
            page_size,
        })
    }

    fn resolve_faces_to_photos(
        &self,
        face_ids: &[FaceId],
    ) -> Result<HashMap<FaceId, ResolvedFace>, StorageError> {
        let mut resolved = HashMap::with_capacity(face_ids.len());
        let mut photos: HashMap<String, Option<PhotoRecord>> = HashMap::new();

        for &face_id in face_ids {
            let Some(face) = self.get_face(face_id)? else {
                continue;
            };
            let photo = match photos.get(&face.photo_id) {
                Some(cached) => cached.clone(),
                None => {
                    let photo = self.get_photo(&face.photo_id)?;
                    photos.insert(face.photo_id.clone(), photo.clone());
                    photo
                }
            };
            if let Some(photo) = photo {
                resolved.insert(face_id, ResolvedFace { face, photo });
            }
        }
        Ok(resolved)
    }

    fn primary_faces(&self) -> Result<Vec<FaceRecord>, StorageError> {
        Ok(self
            .scan_faces()?
            .into_iter()
            .filter(|f| f.is_primary)
            .collect())
    }

    fn set_face_indexed(&self, face_id: FaceId, indexed: bool) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let mut face = self
            .get_face(face_id)?
            .ok_or_else(|| StorageError::NotFound(format!("face {face_id}")))?;
        if face.indexed == indexed {
            return Ok(());
        }
        face.indexed = indexed;
        let mut batch = WriteBatch::default();
        self.write_face(&mut batch, &face)?;
        self.db.write(batch)?;
        debug!(face_id, indexed, "Updated face index flag");
        Ok(())
    }

    fn stats(&self) -> Result<PhotoStats, StorageError> {
        let cf = self.cf(CF_PHOTOS)?;
        let mut stats = PhotoStats::default();
        let mut tags = BTreeSet::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let photo = PhotoRecord::from_bytes(&value)?;
            stats.total_photos += 1;
            if let Some(tag) = photo.tag {
                tags.insert(tag);
            }
        }
        for face in self.scan_faces()? {
            stats.total_faces += 1;
            if face.is_primary {
                stats.primary_faces += 1;
            }
        }
        stats.tags = tags.into_iter().collect();
        Ok(stats)
    }
}
