//! Index rebuild and reconciliation from the metadata store.
//!
//! The vector index is never persisted. On open it is rebuilt from the
//! primary faces in the store, and [`reconcile`] repairs drift without a
//! full rebuild.

use std::collections::HashMap;
use std::time::Instant;

use photomatch_embeddings::Embedding;
use photomatch_storage::MetadataStore;
use photomatch_types::FaceRecord;
use photomatch_vector::VectorIndex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::ServiceError;

/// Result of a full rebuild.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    /// Faces inserted into the fresh index
    pub indexed: usize,
    /// Faces that could not be inserted (flagged unindexed)
    pub failed: usize,
    pub elapsed_ms: u64,
}

/// Result of a reconcile pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    /// Index entries with no matching indexed face in the store
    pub dropped: usize,
    /// Indexed faces that were missing from the index
    pub inserted: usize,
}

/// Clear the index and insert every primary face from the store.
///
/// Faces that insert cleanly are flagged indexed again, including faces
/// previously flagged after a failed insert.
pub fn rebuild_index(
    store: &dyn MetadataStore,
    index: &dyn VectorIndex,
) -> Result<RebuildReport, ServiceError> {
    let started = Instant::now();
    let faces = store.primary_faces()?;
    info!(faces = faces.len(), "Rebuilding vector index");

    index.clear();
    let mut report = RebuildReport::default();
    for face in faces {
        match insert_face(index, &face) {
            Ok(()) => {
                if !face.indexed {
                    store.set_face_indexed(face.face_id, true)?;
                }
                report.indexed += 1;
            }
            Err(err) if err.is_fatal() && !is_dimension_error(&err) => return Err(err),
            Err(err) => {
                error!(face_id = face.face_id, error = %err, "Face could not be indexed");
                store.set_face_indexed(face.face_id, false)?;
                report.failed += 1;
            }
        }
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        indexed = report.indexed,
        failed = report.failed,
        elapsed_ms = report.elapsed_ms,
        "Rebuild complete"
    );
    Ok(report)
}

/// Make the index hold exactly the store's indexed primary faces.
pub fn reconcile(
    store: &dyn MetadataStore,
    index: &dyn VectorIndex,
) -> Result<ReconcileReport, ServiceError> {
    let wanted: HashMap<_, FaceRecord> = store
        .primary_faces()?
        .into_iter()
        .filter(|f| f.indexed)
        .map(|f| (f.face_id, f))
        .collect();

    let mut report = ReconcileReport::default();
    for id in index.ids() {
        if !wanted.contains_key(&id) {
            warn!(face_id = id, "Dropping index entry with no indexed face");
            index.remove(id)?;
            report.dropped += 1;
        }
    }

    let mut missing: Vec<&FaceRecord> = wanted
        .values()
        .filter(|f| !index.contains(f.face_id))
        .collect();
    missing.sort_by_key(|f| f.face_id);
    for face in missing {
        match insert_face(index, face) {
            Ok(()) => report.inserted += 1,
            Err(err) if err.is_fatal() && !is_dimension_error(&err) => return Err(err),
            Err(err) => {
                error!(face_id = face.face_id, error = %err, "Face could not be indexed");
                store.set_face_indexed(face.face_id, false)?;
            }
        }
    }

    info!(dropped = report.dropped, inserted = report.inserted, "Reconcile complete");
    Ok(report)
}

fn insert_face(index: &dyn VectorIndex, face: &FaceRecord) -> Result<(), ServiceError> {
    let embedding = Embedding::from_normalized(face.embedding.clone());
    index.insert(face.face_id, &embedding)?;
    Ok(())
}

/// A stored vector of the wrong length only poisons that one face.
fn is_dimension_error(err: &ServiceError) -> bool {
    matches!(
        err,
        ServiceError::Vector(photomatch_vector::VectorError::DimensionMismatch { .. })
    )
}
