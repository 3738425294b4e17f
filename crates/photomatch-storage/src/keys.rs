//! Key encoding and decoding for storage layer.
//!
//! - Photo keys are the ULID string, so byte order is creation order.
//! - Face keys are the face id as 8 big-endian bytes, so byte order is id order.
//! - Photo-face link keys are `{photo_ulid}:{face_id:020}`, scanned by photo prefix.

use photomatch_types::FaceId;
use ulid::Ulid;

use crate::error::StorageError;

/// Key for photo records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoKey {
    pub ulid: Ulid,
}

impl PhotoKey {
    /// Parse a photo id string
    pub fn from_photo_id(photo_id: &str) -> Result<Self, StorageError> {
        let ulid: Ulid = photo_id
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid photo_id ULID: {}", e)))?;
        Ok(Self { ulid })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.ulid.to_string().into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        Self::from_photo_id(s)
    }

    pub fn photo_id(&self) -> String {
        self.ulid.to_string()
    }
}

/// Key for face records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceKey {
    pub face_id: FaceId,
}

impl FaceKey {
    pub fn new(face_id: FaceId) -> Self {
        Self { face_id }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.face_id.to_be_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| StorageError::Key(format!("Face key must be 8 bytes, got {}", bytes.len())))?;
        Ok(Self {
            face_id: FaceId::from_be_bytes(raw),
        })
    }
}

/// Link from a photo to one of its faces
/// Format: {photo_id}:{face_id:020}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoFaceKey {
    pub photo_id: String,
    pub face_id: FaceId,
}

impl PhotoFaceKey {
    pub fn new(photo_id: impl Into<String>, face_id: FaceId) -> Self {
        Self {
            photo_id: photo_id.into(),
            face_id,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{:020}", self.photo_id, self.face_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let (photo_id, face_id) = s
            .split_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid photo-face key format: {}", s)))?;
        let face_id: FaceId = face_id
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid face id: {}", e)))?;
        Ok(Self::new(photo_id, face_id))
    }

    /// Prefix covering every face of a photo
    pub fn prefix(photo_id: &str) -> Vec<u8> {
        format!("{}:", photo_id).into_bytes()
    }
}
