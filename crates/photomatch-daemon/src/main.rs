//! PhotoMatch
//!
//! Face-based photo search for event galleries.
//!
//! # Usage
//!
//! ```bash
//! photomatch ingest <FOLDER> [--tag TAG] [--recursive]
//! photomatch search <IMAGE> [--top-k K] [--threshold T] [--tag TAG]
//! photomatch photos [--page N] [--tag TAG]
//! photomatch stats
//! photomatch remove <PHOTO_ID>
//! photomatch rebuild [--reconcile]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/photomatch/config.toml)
//! 3. Environment variables (PHOTOMATCH_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use photomatch_daemon::{
    handle_ingest, handle_photos, handle_rebuild, handle_remove, handle_search, handle_stats,
    init_logging, load_settings, Cli, Commands, GlobalOptions,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let options = GlobalOptions {
        config: cli.config,
        log_level: cli.log_level,
        db_path: cli.db_path,
    };
    let settings = load_settings(&options)?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Ingest {
            folder,
            tag,
            recursive,
            json,
        } => {
            handle_ingest(settings, &folder, tag, recursive, json).await?;
        }
        Commands::Search {
            image,
            top_k,
            threshold,
            tag,
            json,
        } => {
            tokio::task::spawn_blocking(move || {
                handle_search(settings, &image, top_k, threshold, tag, json)
            })
            .await??;
        }
        Commands::Photos {
            page,
            page_size,
            tag,
        } => {
            handle_photos(settings, page, page_size, tag)?;
        }
        Commands::Stats => {
            handle_stats(settings)?;
        }
        Commands::Remove { photo_id } => {
            handle_remove(settings, &photo_id)?;
        }
        Commands::Rebuild { reconcile } => {
            handle_rebuild(settings, reconcile)?;
        }
    }

    Ok(())
}
