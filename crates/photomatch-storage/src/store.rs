//! Metadata store interface consumed by the ingest and search services.

use std::collections::HashMap;

use photomatch_types::{
    FaceId, FaceRecord, NewFace, NewPhoto, PhotoPage, PhotoRecord, PhotoStats, ResolvedFace,
};

use crate::error::StorageError;

/// Persistence for photos and faces.
///
/// Implementations must be thread-safe (Send + Sync); ingest workers and
/// search requests share one instance.
pub trait MetadataStore: Send + Sync {
    /// Persist a photo. Fails with [`StorageError::DuplicateHash`] when a
    /// photo with the same content hash already exists.
    fn create_photo(&self, photo: NewPhoto) -> Result<PhotoRecord, StorageError>;

    /// Persist a face of an existing photo and assign its id.
    fn create_face(&self, face: NewFace) -> Result<FaceRecord, StorageError>;

    fn find_photo_by_hash(&self, content_hash: &str) -> Result<Option<PhotoRecord>, StorageError>;

    fn get_photo(&self, photo_id: &str) -> Result<Option<PhotoRecord>, StorageError>;

    fn get_face(&self, face_id: FaceId) -> Result<Option<FaceRecord>, StorageError>;

    /// Faces of a photo in id order.
    fn faces_for_photo(&self, photo_id: &str) -> Result<Vec<FaceRecord>, StorageError>;

    /// Delete a photo with all its faces. Returns the deleted face ids, or
    /// `None` when the photo does not exist.
    fn delete_photo_and_faces(&self, photo_id: &str) -> Result<Option<Vec<FaceId>>, StorageError>;

    /// One page of photos, newest first. `page` is 1-based.
    fn list_photos_page(
        &self,
        page: usize,
        page_size: usize,
        tag: Option<&str>,
    ) -> Result<PhotoPage, StorageError>;

    /// Resolve face ids to their face and photo. Unknown ids are absent
    /// from the result.
    fn resolve_faces_to_photos(
        &self,
        face_ids: &[FaceId],
    ) -> Result<HashMap<FaceId, ResolvedFace>, StorageError>;

    /// Every primary face in id order, indexed or not. Source for index rebuilds.
    fn primary_faces(&self) -> Result<Vec<FaceRecord>, StorageError>;

    /// Flag a face as (un)indexed.
    fn set_face_indexed(&self, face_id: FaceId, indexed: bool) -> Result<(), StorageError>;

    fn stats(&self) -> Result<PhotoStats, StorageError>;
}
