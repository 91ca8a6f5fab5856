//! Central path resolution for server data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `TANDEM_SERVER_DATA_DIR` env > `~/.tandem`.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub const DATA_DIR_ENV: &str = "TANDEM_SERVER_DATA_DIR";

/// Priority: `explicit` arg > `TANDEM_SERVER_DATA_DIR` env > `~/.tandem` default.
pub fn resolve_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(env_val) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(env_val));
    }
    let home = dirs::home_dir().context("HOME directory not found")?;
    Ok(home.join(".tandem"))
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("tandem.db")
}

pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs(data_dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::create_dir_all(log_dir(data_dir))?;
    Ok(())
}
