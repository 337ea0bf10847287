use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use tinker_core::Config;
use tracing_subscriber::EnvFilter;

/// Route tracing output to the log file; the terminal belongs to the TUI.
///
/// `RUST_LOG` wins over `log_filter` from the config. Returns the log path.
pub fn init(config: &Config) -> Result<PathBuf> {
    let path = Config::log_path()?;
    init_at(&path, &config.log_filter)?;
    Ok(path)
}

fn init_at(path: &Path, default_filter: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow!("Could not install logger: {e}"))
}
