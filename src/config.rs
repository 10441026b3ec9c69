use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::ani_cli::resolve_ani_cli_bin_from_env;
use crate::catalog::Mode;
use crate::paths::{config_file_path, default_data_dir, default_download_dir};

const DEFAULT_PLAYER: &str = "mpv";
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30 * 60;

/// Optional settings read from `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    ani_cli_bin: Option<PathBuf>,
    download_dir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    player: Option<PathBuf>,
    mode: Option<Mode>,
    download_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Config {
    pub(crate) ani_cli_bin: PathBuf,
    pub(crate) download_dir: PathBuf,
    pub(crate) data_dir: PathBuf,
    pub(crate) player: PathBuf,
    pub(crate) mode: Mode,
    pub(crate) download_timeout: Duration,
}

impl Config {
    pub(crate) fn load() -> Result<Self> {
        let path = config_file_path();
        Self::load_from(path.as_deref(), |name| std::env::var_os(name))
    }

    /// Builds the configuration from an optional file, then environment overrides.
    pub(crate) fn load_from(path: Option<&Path>, env: impl Fn(&str) -> Option<OsString>) -> Result<Self> {
        let file = match path {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };

        let ani_cli_bin = match env("ANISHELF_ANI_CLI_BIN") {
            Some(value) => resolve_ani_cli_bin_from_env(Some(value)),
            None => resolve_ani_cli_bin_from_env(file.ani_cli_bin.map(PathBuf::into_os_string)),
        };
        let download_dir = match non_empty(env("ANISHELF_DOWNLOAD_DIR")).or(file.download_dir) {
            Some(dir) => dir,
            None => default_download_dir()?,
        };
        let data_dir = match non_empty(env("ANISHELF_DATA_DIR")).or(file.data_dir) {
            Some(dir) => dir,
            None => default_data_dir()?,
        };
        let player = non_empty(env("ANISHELF_PLAYER"))
            .or(file.player)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLAYER));

        let mode = match env("ANISHELF_MODE") {
            Some(raw) => raw
                .to_string_lossy()
                .parse::<Mode>()
                .context("invalid ANISHELF_MODE")?,
            None => file.mode.unwrap_or_default(),
        };

        let timeout_secs = match env("ANISHELF_DOWNLOAD_TIMEOUT_SECS") {
            Some(raw) => raw
                .to_string_lossy()
                .trim()
                .parse::<u64>()
                .with_context(|| {
                    format!("invalid ANISHELF_DOWNLOAD_TIMEOUT_SECS `{}`", raw.to_string_lossy())
                })?,
            None => file
                .download_timeout_secs
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
        };
        if timeout_secs == 0 {
            bail!("download timeout must be at least one second");
        }

        Ok(Self {
            ani_cli_bin,
            download_dir,
            data_dir,
            player,
            mode,
            download_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub(crate) fn history_db_path(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    pub(crate) fn posters_dir(&self) -> PathBuf {
        self.data_dir.join("posters")
    }

    pub(crate) fn log_file_path(&self) -> PathBuf {
        self.data_dir.join("anishelf.log")
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(FileConfig::default()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn non_empty(value: Option<OsString>) -> Option<PathBuf> {
    value.filter(|value| !value.is_empty()).map(PathBuf::from)
}
