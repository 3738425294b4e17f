//! CLI argument parsing for the photomatch binary.
//!
//! CLI flags override every other config source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// PhotoMatch
///
/// Index event photos by face and find the photos a person appears in.
#[derive(Parser, Debug)]
#[command(name = "photomatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/photomatch/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest every image in a folder
    ///
    /// Each image needs a `<image>.faces.json` detection sidecar.
    Ingest {
        folder: PathBuf,

        /// Event tag stored with every photo
        #[arg(short, long)]
        tag: Option<String>,

        /// Descend into subfolders
        #[arg(short, long)]
        recursive: bool,

        /// Print the per-item report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find photos containing the face in a query image
    Search {
        image: PathBuf,

        /// Maximum results (default from config)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Minimum similarity 0.0-1.0 (default from config)
        #[arg(long)]
        threshold: Option<f32>,

        /// Only return photos with this tag
        #[arg(short, long)]
        tag: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// List photos, newest first
    Photos {
        #[arg(short, long, default_value = "1")]
        page: usize,

        #[arg(long, default_value = "20")]
        page_size: usize,

        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Show store and index statistics
    Stats,

    /// Delete a photo and its faces
    Remove { photo_id: String },

    /// Rebuild the vector index from the store
    Rebuild {
        /// Repair drift instead of a full rebuild
        #[arg(long)]
        reconcile: bool,
    },
}
