//! Configuration loading for photomatch.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/photomatch/config.toml`.
//! Environment variables use the `PHOTOMATCH_` prefix with `__` between
//! nested keys, e.g. `PHOTOMATCH_INDEX__EF_SEARCH=128`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PhotoMatchError;

/// HNSW graph parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Maximum neighbors per node on layers above 0 (layer 0 uses `2*m`)
    #[serde(default = "default_m")]
    pub m: usize,

    /// Beam width used while inserting
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,

    /// Default beam width used while searching (raised to `k` when smaller)
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,

    /// Fixed RNG seed for level assignment. Unset means OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_m() -> usize {
    16
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    64
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            seed: None,
        }
    }
}

impl IndexSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.m < 2 {
            return Err(format!("index.m must be >= 2, got {}", self.m));
        }
        if self.ef_construction < self.m {
            return Err(format!(
                "index.ef_construction ({}) must be >= index.m ({})",
                self.ef_construction, self.m
            ));
        }
        if self.ef_search == 0 {
            return Err("index.ef_search must be > 0".to_string());
        }
        Ok(())
    }
}

/// Search defaults and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Minimum similarity, 0.0-1.0
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Upper bound on `top_k` accepted from callers
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Wall-clock budget for the graph search (ms). 0 disables the timeout.
    #[serde(default)]
    pub timeout_ms: u64,
}

fn default_top_k() -> usize {
    30
}

fn default_threshold() -> f32 {
    0.6
}

fn default_max_top_k() -> usize {
    100
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            default_threshold: default_threshold(),
            max_top_k: default_max_top_k(),
            timeout_ms: 0,
        }
    }
}

impl SearchSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.default_threshold) {
            return Err(format!(
                "search.default_threshold must be 0.0-1.0, got {}",
                self.default_threshold
            ));
        }
        if self.max_top_k == 0 {
            return Err("search.max_top_k must be > 0".to_string());
        }
        if self.default_top_k == 0 || self.default_top_k > self.max_top_k {
            return Err(format!(
                "search.default_top_k must be 1-{}, got {}",
                self.max_top_k, self.default_top_k
            ));
        }
        Ok(())
    }
}

/// Ingestion behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Keep photo metadata for images without a usable face (browse-only).
    #[serde(default)]
    pub store_faceless_photos: bool,

    /// Persist non-primary faces (never indexed).
    #[serde(default)]
    pub store_secondary_faces: bool,

    /// Concurrent workers for folder ingestion
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_workers() -> usize {
    4
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            store_faceless_photos: false,
            store_secondary_faces: false,
            workers: default_workers(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB metadata directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Root folder that photo paths are stored relative to
    #[serde(default = "default_images_folder")]
    pub images_folder: String,

    /// URL prefix under which images are served
    #[serde(default = "default_static_mount_path")]
    pub static_mount_path: String,

    /// Embedding dimension produced by the face model
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub ingest: IngestSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "photomatch")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data/db"))
        .to_string_lossy()
        .to_string()
}

fn default_images_folder() -> String {
    "data/images".to_string()
}

fn default_static_mount_path() -> String {
    "/static".to_string()
}

fn default_embedding_dim() -> usize {
    512
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            images_folder: default_images_folder(),
            static_mount_path: default_static_mount_path(),
            embedding_dim: default_embedding_dim(),
            log_level: default_log_level(),
            index: IndexSettings::default(),
            search: SearchSettings::default(),
            ingest: IngestSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/photomatch/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (PHOTOMATCH_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, PhotoMatchError> {
        let config_dir = ProjectDirs::from("", "", "photomatch")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| PhotoMatchError::Config(e.to_string()))?
            .set_default("images_folder", default_images_folder())
            .map_err(|e| PhotoMatchError::Config(e.to_string()))?
            .set_default("static_mount_path", default_static_mount_path())
            .map_err(|e| PhotoMatchError::Config(e.to_string()))?
            .set_default("embedding_dim", default_embedding_dim() as i64)
            .map_err(|e| PhotoMatchError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| PhotoMatchError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // PHOTOMATCH_DB_PATH, PHOTOMATCH_SEARCH__TIMEOUT_MS, ...
        builder = builder.add_source(
            Environment::with_prefix("PHOTOMATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| PhotoMatchError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| PhotoMatchError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), PhotoMatchError> {
        if self.embedding_dim == 0 {
            return Err(PhotoMatchError::Config(
                "embedding_dim must be > 0".to_string(),
            ));
        }
        self.index.validate().map_err(PhotoMatchError::Config)?;
        self.search.validate().map_err(PhotoMatchError::Config)?;
        if self.ingest.workers == 0 {
            return Err(PhotoMatchError::Config(
                "ingest.workers must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Expand a leading `~/` in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand a leading `~/` in images_folder to the home directory
    pub fn expanded_images_folder(&self) -> PathBuf {
        expand_home(&self.images_folder)
    }

    /// Public URL of an image stored at `path`.
    pub fn image_url(&self, path: &str) -> String {
        let clean = path.replace('\\', "/");
        format!(
            "{}/{}",
            self.static_mount_path.trim_end_matches('/'),
            clean.trim_start_matches('/')
        )
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.embedding_dim, 512);
        assert_eq!(settings.search.default_top_k, 30);
        assert!((settings.search.default_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(settings.index.m, 16);
        assert!(!settings.ingest.store_faceless_photos);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert!(settings.embedding_dim > 0);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("photomatch.toml");
        std::fs::write(
            &path,
            "embedding_dim = 128\n[index]\nm = 8\nef_construction = 64\n[search]\ndefault_top_k = 10\n",
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.embedding_dim, 128);
        assert_eq!(settings.index.m, 8);
        assert_eq!(settings.index.ef_construction, 64);
        assert_eq!(settings.search.default_top_k, 10);
        assert_eq!(settings.search.max_top_k, 100);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut settings = Settings::default();
        settings.search.default_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_index_validation() {
        let mut index = IndexSettings::default();
        assert!(index.validate().is_ok());

        index.m = 1;
        assert!(index.validate().is_err());

        index.m = 16;
        index.ef_construction = 8;
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_image_url() {
        let settings = Settings::default();
        assert_eq!(settings.image_url("gala/001.jpg"), "/static/gala/001.jpg");
        assert_eq!(settings.image_url("gala\\002.jpg"), "/static/gala/002.jpg");
    }
}
