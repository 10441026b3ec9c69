use std::path::PathBuf;

use anyhow::{Context, Result};

const APP_DIR: &str = "anishelf";

pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join(APP_DIR).join("config.toml"))
}

pub fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join(APP_DIR))
}

pub fn default_download_dir() -> Result<PathBuf> {
    let base = dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .context("unable to resolve download directory")?;
    Ok(base.join(APP_DIR))
}
