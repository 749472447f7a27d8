//! Log setup
//!
//! The TUI owns stdout, so logs go to ~/.local/state/podterm/podterm.log.
//! Filter with RUST_LOG (default `podterm=info`).

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::config;

const DEFAULT_FILTER: &str = "podterm=info";

pub fn log_path() -> Result<PathBuf> {
    Ok(config::state_dir()?.join("podterm.log"))
}

/// Install the global subscriber writing to the state-dir log file
pub fn init() -> Result<PathBuf> {
    config::ensure_dirs()?;
    let path = log_path()?;
    init_at(&path)?;
    Ok(path)
}

pub fn init_at(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;
    Ok(())
}
