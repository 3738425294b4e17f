//! Command implementations for the photomatch binary.
//!
//! Handles:
//! - ingest: load detection sidecars, ingest a folder on a worker pool
//! - search: query with the primary face of an image
//! - photos / stats: browse the store
//! - remove / rebuild: maintenance

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use photomatch_embeddings::PrecomputedDetector;
use photomatch_service::{
    collect_images, storage_path, BatchReport, IngestOutcome, PhotoMatch, SearchOutcome,
    SearchRequest, ServiceError,
};
use photomatch_types::Settings;

/// Global flags shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<String>,
    pub log_level: Option<String>,
    pub db_path: Option<String>,
}

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(options: &GlobalOptions) -> Result<Settings> {
    let mut settings =
        Settings::load(options.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db_path) = &options.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(log_level) = &options.log_level {
        settings.log_level = log_level.clone();
    }
    Ok(settings)
}

/// Install the tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open the engine with a sidecar-backed detector.
pub fn open_engine(settings: Settings) -> Result<(Arc<PhotoMatch>, Arc<PrecomputedDetector>)> {
    info!("Opening storage at {}", settings.db_path);
    let detector = Arc::new(PrecomputedDetector::new(settings.embedding_dim));
    let engine = PhotoMatch::open(settings, detector.clone()).context("Failed to open PhotoMatch")?;
    Ok((Arc::new(engine), detector))
}

/// Ingest one file on the calling thread: read it, register its sidecar,
/// ingest. Unreadable files become per-item failures.
fn ingest_one(
    engine: &PhotoMatch,
    detector: &PrecomputedDetector,
    path: &Path,
    root: &Path,
    tag: Option<&str>,
) -> Result<IngestOutcome, ServiceError> {
    let image = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Cannot read {}: {}", path.display(), e);
            return Ok(IngestOutcome::Failed {
                reason: format!("cannot read {}: {}", path.display(), e),
            });
        }
    };
    match detector.load_sidecar(path, &image) {
        Ok(true) => {}
        Ok(false) => warn!("No detection sidecar for {}", path.display()),
        Err(e) => warn!("Bad detection sidecar for {}: {}", path.display(), e),
    }
    engine.ingest(&image, &storage_path(path, root), tag)
}

/// Ingest `paths` on at most `workers` blocking tasks.
///
/// The report lists items in path order. A fatal error raises the halt
/// flag: items not yet started are skipped and the error is returned.
/// Items already running on other workers finish.
pub async fn ingest_concurrently(
    engine: Arc<PhotoMatch>,
    detector: Arc<PrecomputedDetector>,
    paths: Vec<PathBuf>,
    root: PathBuf,
    tag: Option<String>,
    workers: usize,
) -> Result<BatchReport> {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let halt = Arc::new(AtomicBool::new(false));
    let root = Arc::new(root);
    let mut tasks = JoinSet::new();

    for (position, path) in paths.iter().cloned().enumerate() {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .context("Worker pool closed")?;
        if halt.load(Ordering::Acquire) {
            break;
        }
        let engine = engine.clone();
        let detector = detector.clone();
        let root = root.clone();
        let tag = tag.clone();
        let halt = halt.clone();
        tasks.spawn_blocking(move || {
            let _permit = permit;
            if halt.load(Ordering::Acquire) {
                return (position, None);
            }
            let result = ingest_one(&engine, &detector, &path, &root, tag.as_deref());
            if matches!(&result, Err(e) if e.is_fatal()) {
                // Raised before the permit is released
                halt.store(true, Ordering::Release);
            }
            (position, Some(result))
        });
    }

    let mut outcomes: Vec<Option<IngestOutcome>> = vec![None; paths.len()];
    let mut fatal: Option<ServiceError> = None;
    while let Some(joined) = tasks.join_next().await {
        let (position, result) = joined.context("Ingest worker panicked")?;
        let Some(result) = result else {
            continue;
        };
        match result {
            Ok(outcome) => outcomes[position] = Some(outcome),
            Err(e) if e.is_fatal() => {
                error!("Fatal error on {}: {}", paths[position].display(), e);
                fatal.get_or_insert(e);
            }
            Err(e) => {
                warn!("Ingest failed for {}: {}", paths[position].display(), e);
                outcomes[position] = Some(IngestOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        }
    }
    if let Some(e) = fatal {
        return Err(e).context("Ingestion halted");
    }

    let mut report = BatchReport::default();
    for (path, outcome) in paths.iter().zip(outcomes) {
        if let Some(outcome) = outcome {
            report.record(storage_path(path, &root), outcome);
        }
    }
    Ok(report)
}

pub async fn handle_ingest(
    settings: Settings,
    folder: &Path,
    tag: Option<String>,
    recursive: bool,
    json: bool,
) -> Result<()> {
    let workers = settings.ingest.workers;
    let (engine, detector) = open_engine(settings)?;
    let paths = collect_images(folder, recursive)
        .with_context(|| format!("Failed to scan {}", folder.display()))?;
    info!("Ingesting {} images from {}", paths.len(), folder.display());

    let report = ingest_concurrently(
        engine,
        detector,
        paths,
        folder.to_path_buf(),
        tag,
        workers,
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for item in &report.items {
            println!("{:<14} {}", item.outcome.label(), item.path);
        }
        println!(
            "\nprocessed: {}  skipped: {}  no face: {}  errors: {}",
            report.processed, report.skipped, report.no_face, report.errors
        );
    }
    Ok(())
}

pub fn handle_search(
    settings: Settings,
    image_path: &Path,
    top_k: Option<usize>,
    threshold: Option<f32>,
    tag: Option<String>,
    json: bool,
) -> Result<()> {
    let (engine, detector) = open_engine(settings)?;
    let image = std::fs::read(image_path)
        .with_context(|| format!("Failed to read {}", image_path.display()))?;
    detector
        .load_sidecar(image_path, &image)
        .with_context(|| format!("Bad detection sidecar for {}", image_path.display()))?;

    let defaults = engine.default_request();
    let mut request = SearchRequest::new(
        top_k.unwrap_or(defaults.top_k),
        threshold.unwrap_or(defaults.threshold),
    );
    if let Some(tag) = tag {
        request = request.with_tag(tag);
    }

    let outcome = engine.search(&image, &request).context("Search failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_search(&outcome);
    }
    Ok(())
}

fn print_search(outcome: &SearchOutcome) {
    if let Some(message) = &outcome.message {
        println!("{message}");
    }
    for (rank, hit) in outcome.results.iter().enumerate() {
        println!(
            "{:>3}. {:.4}  {}  {}",
            rank + 1,
            hit.similarity,
            hit.image_url,
            hit.tag.as_deref().unwrap_or("-")
        );
    }
    let partial = if outcome.timed_out { " (partial, timed out)" } else { "" };
    println!(
        "\n{} results in {} ms{}",
        outcome.results.len(),
        outcome.query_time_ms,
        partial
    );
}

pub fn handle_photos(
    settings: Settings,
    page: usize,
    page_size: usize,
    tag: Option<String>,
) -> Result<()> {
    let (engine, _) = open_engine(settings)?;
    let listing = engine
        .list_photos(page, page_size, tag.as_deref())
        .context("Failed to list photos")?;
    for photo in &listing.photos {
        println!(
            "{}  {}  {}x{}  {}",
            photo.photo_id,
            engine.settings().image_url(&photo.path),
            photo.width,
            photo.height,
            photo.tag.as_deref().unwrap_or("-")
        );
    }
    println!(
        "\npage {}/{} ({} photos)",
        listing.page,
        listing.total_pages().max(1),
        listing.total
    );
    Ok(())
}

pub fn handle_stats(settings: Settings) -> Result<()> {
    let (engine, _) = open_engine(settings)?;
    let stats = engine.stats().context("Failed to read stats")?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

pub fn handle_remove(settings: Settings, photo_id: &str) -> Result<()> {
    let (engine, _) = open_engine(settings)?;
    if engine.remove_photo(photo_id).context("Failed to remove photo")? {
        println!("Removed {photo_id}");
    } else {
        println!("No photo {photo_id}");
    }
    Ok(())
}

/// Opening the engine already rebuilds; `reconcile` then checks for drift.
pub fn handle_rebuild(settings: Settings, reconcile: bool) -> Result<()> {
    let (engine, _) = open_engine(settings)?;
    if reconcile {
        let report = engine.reconcile().context("Reconcile failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let report = engine.rebuild().context("Rebuild failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    engine.validate_index().context("Index failed validation")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use photomatch_embeddings::{DetectedFace, Detection, SIDECAR_SUFFIX};
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> Settings {
        Settings {
            db_path: dir.path().join("db").to_string_lossy().to_string(),
            embedding_dim: 2,
            ..Settings::default()
        }
    }

    fn write_image(folder: &Path, name: &str, faces: Vec<DetectedFace>) {
        let image = folder.join(name);
        std::fs::write(&image, format!("bytes of {name}")).unwrap();
        let sidecar = folder.join(format!("{name}{SIDECAR_SUFFIX}"));
        let detection = Detection::new(64, 64, faces);
        std::fs::write(sidecar, serde_json::to_vec(&detection).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_ingest_concurrently_keeps_path_order() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("event");
        std::fs::create_dir_all(&folder).unwrap();
        for i in 0..6 {
            let face = DetectedFace::new([0.0, 0.0, 8.0, 8.0], vec![1.0, i as f32]);
            write_image(&folder, &format!("{i}.jpg"), vec![face]);
        }
        write_image(&folder, "empty.jpg", vec![]);

        let (engine, detector) = open_engine(settings(&dir)).unwrap();
        let paths = collect_images(&folder, false).unwrap();
        let report = ingest_concurrently(
            engine.clone(),
            detector,
            paths,
            folder.clone(),
            Some("gala".to_string()),
            3,
        )
        .await
        .unwrap();

        assert_eq!(report.total(), 7);
        assert_eq!(report.processed, 6);
        assert_eq!(report.no_face, 1);
        let names: Vec<_> = report.items.iter().map(|i| i.path.clone()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(engine.stats().unwrap().index.vector_count, 6);
        engine.validate_index().unwrap();
    }

    #[tokio::test]
    async fn test_missing_sidecar_is_item_failure() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("event");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("lonely.jpg"), b"no sidecar").unwrap();

        let (engine, detector) = open_engine(settings(&dir)).unwrap();
        let paths = collect_images(&folder, false).unwrap();
        let report = ingest_concurrently(engine, detector, paths, folder, None, 2)
            .await
            .unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(report.processed, 0);
    }

    #[tokio::test]
    async fn test_fatal_error_halts_batch() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("event");
        std::fs::create_dir_all(&folder).unwrap();
        // Sorts first; its 3-d vector cannot go into a 2-d index
        let wide = DetectedFace::new([0.0, 0.0, 8.0, 8.0], vec![1.0, 0.0, 0.0]);
        write_image(&folder, "a.jpg", vec![wide]);
        for i in 0..8 {
            let face = DetectedFace::new([0.0, 0.0, 8.0, 8.0], vec![1.0, i as f32]);
            write_image(&folder, &format!("b{i}.jpg"), vec![face]);
        }

        let (engine, detector) = open_engine(settings(&dir)).unwrap();
        let paths = collect_images(&folder, false).unwrap();
        assert_eq!(paths.len(), 9);
        let result =
            ingest_concurrently(engine.clone(), detector, paths, folder, None, 1).await;

        assert!(result.is_err());
        let stats = engine.stats().unwrap();
        assert_eq!(stats.photos.total_photos, 0);
        assert_eq!(stats.index.vector_count, 0);
    }

    #[test]
    fn test_load_settings_applies_overrides() {
        let options = GlobalOptions {
            config: None,
            log_level: Some("debug".to_string()),
            db_path: Some("/tmp/photomatch-test-db".to_string()),
        };
        let settings = load_settings(&options).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.db_path, "/tmp/photomatch-test-db");
    }
}
