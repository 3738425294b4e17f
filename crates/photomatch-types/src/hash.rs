//! Content hashing for image deduplication.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the raw image bytes.
///
/// Two uploads dedup only when their bytes are identical; visually similar
/// images hash differently and are ingested separately.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_single_byte_change_differs() {
        assert_ne!(content_hash(b"image-bytes-1"), content_hash(b"image-bytes-2"));
    }
}
