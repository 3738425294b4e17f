//! PhotoMatch binary library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    handle_ingest, handle_photos, handle_rebuild, handle_remove, handle_search, handle_stats,
    ingest_concurrently, init_logging, load_settings, open_engine, GlobalOptions,
};
