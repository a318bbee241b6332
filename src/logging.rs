//! Process-wide logging setup.
//!
//! Every run writes to a fresh timestamped log file so histories of
//! individual sync sessions never overwrite each other.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_PREFIX: &str = "history_cloudsweep";

/// Initializes the global tracing subscriber, logging to a new
/// `history_cloudsweep_<timestamp>.log` file under `dir`. Returns the log
/// file path. `RUST_LOG` overrides the default `debug` level.
pub fn init(dir: &Path) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("{LOG_FILE_PREFIX}_{stamp}.log"));
    let file = File::create(&path)
        .with_context(|| format!("creating log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();

    Ok(path)
}
