//! Ingestion E2E tests: dedup, primary face selection, faceless images,
//! folder batches.

use pretty_assertions::assert_eq;

use e2e_tests::{face, TestHarness};
use photomatch_embeddings::Embedding;
use photomatch_service::{IngestOutcome, SearchRequest};

#[test]
fn test_ingestion_is_idempotent() {
    let harness = TestHarness::new(2);
    let bytes = harness.image("same", vec![face(20.0, vec![1.0, 0.0])]);

    let first = harness.engine.ingest(&bytes, "same.jpg", None).unwrap();
    let IngestOutcome::Created { photo_id, .. } = first else {
        panic!("expected Created, got {first:?}");
    };
    let second = harness.engine.ingest(&bytes, "copy-of-same.jpg", None).unwrap();
    assert_eq!(second, IngestOutcome::Duplicate { photo_id });

    let stats = harness.engine.stats().unwrap();
    assert_eq!(stats.photos.total_photos, 1);
    assert_eq!(stats.photos.total_faces, 1);
    assert_eq!(stats.index.vector_count, 1);
}

/// The 20x20 face (area 400) wins over the 10x10 face (area 100)
/// regardless of scan order.
#[test]
fn test_primary_face_is_largest() {
    let harness = TestHarness::new(2);
    let bytes = harness.image(
        "group",
        vec![face(10.0, vec![1.0, 0.0]), face(20.0, vec![0.0, 1.0])],
    );
    let outcome = harness.engine.ingest(&bytes, "group.jpg", None).unwrap();
    let IngestOutcome::Created {
        face_id,
        faces_detected,
        ..
    } = outcome
    else {
        panic!("expected Created, got {outcome:?}");
    };
    assert_eq!(faces_detected, 2);

    let stored = harness.engine.store().get_face(face_id).unwrap().unwrap();
    assert_eq!(stored.bbox.area(), 400);
    assert!(stored.is_primary);

    let hits = harness
        .engine
        .search_vector(&Embedding::new(vec![0.0, 1.0]).unwrap(), &SearchRequest::new(5, 0.9))
        .unwrap();
    assert_eq!(hits.results.len(), 1);
    assert_eq!(hits.results[0].face_id, face_id);
}

#[test]
fn test_no_face_creates_nothing() {
    let harness = TestHarness::new(2);
    let bytes = harness.image("landscape", vec![]);
    let outcome = harness.engine.ingest(&bytes, "landscape.jpg", None).unwrap();
    assert_eq!(outcome, IngestOutcome::NoFaceDetected { photo_id: None });

    let stats = harness.engine.stats().unwrap();
    assert_eq!(stats.photos.total_photos, 0);
    assert_eq!(stats.index.vector_count, 0);
}

#[test]
fn test_faceless_photos_kept_when_configured() {
    let harness = TestHarness::with_settings(|s| {
        s.embedding_dim = 2;
        s.ingest.store_faceless_photos = true;
    });
    let bytes = harness.image("landscape", vec![]);
    let outcome = harness.engine.ingest(&bytes, "landscape.jpg", Some("gala")).unwrap();
    let IngestOutcome::NoFaceDetected {
        photo_id: Some(photo_id),
    } = outcome
    else {
        panic!("expected stored faceless photo, got {outcome:?}");
    };

    let page = harness.engine.list_photos(1, 10, Some("gala")).unwrap();
    assert_eq!(page.photos[0].photo_id, photo_id);
    assert_eq!(harness.engine.stats().unwrap().index.vector_count, 0);
}

#[test]
fn test_folder_batch_continues_past_bad_items() {
    let harness = TestHarness::new(2);
    let folder = harness.folder("gala");
    let good = harness.image("good", vec![face(20.0, vec![1.0, 0.0])]);
    let empty = harness.image("empty", vec![]);
    std::fs::write(folder.join("01.jpg"), &good).unwrap();
    std::fs::write(folder.join("02.jpg"), b"corrupt").unwrap();
    std::fs::write(folder.join("03.png"), &empty).unwrap();
    std::fs::write(folder.join("04.jpeg"), &good).unwrap();
    std::fs::write(folder.join("readme.md"), b"skip me").unwrap();

    let report = harness
        .engine
        .ingest_folder(&folder, Some("gala"), false)
        .unwrap();
    let labels: Vec<_> = report
        .items
        .iter()
        .map(|i| (i.path.as_str(), i.outcome.label()))
        .collect();
    assert_eq!(
        labels,
        vec![
            ("01.jpg", "created"),
            ("02.jpg", "failed"),
            ("03.png", "no_face"),
            ("04.jpeg", "duplicate"),
        ]
    );
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.errors, 1);
}
