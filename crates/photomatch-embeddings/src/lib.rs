//! # photomatch-embeddings
//!
//! Face embedding vectors and the detector/embedder interface.
//!
//! The face model itself is an external collaborator: it turns image bytes
//! into bounding boxes with raw embedding vectors. This crate only consumes
//! that output through the [`FaceDetector`] trait and provides the vector
//! math the index and services rely on.
//!
//! ## Features
//! - L2 normalization with explicit failure on degenerate vectors
//! - Cosine similarity / distance over unit vectors
//! - Strict dimension checks
//! - [`PrecomputedDetector`] serving detections produced ahead of time
//!   (JSON sidecar files or test fixtures)

pub mod detector;
pub mod error;
pub mod model;
pub mod precomputed;

pub use detector::{DetectedFace, Detection, DetectorInfo, FaceDetector};
pub use error::EmbeddingError;
pub use model::{cosine_distance, cosine_similarity, dot, normalize, Embedding, SELF_SIMILARITY_TOLERANCE};
pub use precomputed::{sidecar_path, PrecomputedDetector, SIDECAR_SUFFIX};
