//! Data directory resolution for coordinator-owned files.
//!
//! Priority: explicit path > `TANDEM_DATA_DIR` env > `<config dir>/tandem`.

use std::path::{Path, PathBuf};

use crate::config::ConfigError;

pub const DATA_DIR_ENV: &str = "TANDEM_DATA_DIR";

pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(value) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(value));
    }
    dirs::config_dir()
        .map(|dir| dir.join("tandem"))
        .ok_or(ConfigError::NoDataDir)
}

pub fn session_file(data_dir: &Path) -> PathBuf {
    data_dir.join("session.json")
}

pub fn config_file(data_dir: &Path) -> PathBuf {
    data_dir.join("coordinator.toml")
}
