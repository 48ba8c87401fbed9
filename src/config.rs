use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ShelfError;

pub const DEFAULT_CONFIG_FILE: &str = "softshelf.json";
pub const DEFAULT_LEDGER_FILE: &str = "downloaded_software.json";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const BASE_URL_ENV: &str = "SOFTSHELF_BASE_URL";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub install_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub ledger_path: Option<Utf8PathBuf>,
    #[serde(default)]
    pub shortcut_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub harden_archive_paths: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub base_url: String,
    pub install_root: Utf8PathBuf,
    pub ledger_path: Utf8PathBuf,
    pub shortcut_dir: Option<Utf8PathBuf>,
    pub timeout: Option<Duration>,
    pub harden_archive_paths: bool,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `softshelf.json` in the working directory when it exists.
    /// A missing default file is not an error: every setting has a default.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ShelfError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config = if path.is_none() && !config_path.exists() {
            Config::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| ShelfError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| ShelfError::ConfigParse(err.to_string()))?
        };

        let data_root = default_data_root()?;
        let env_base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty());
        Ok(Self::resolve_config(config, data_root, env_base_url))
    }

    pub fn resolve_config(
        config: Config,
        data_root: Utf8PathBuf,
        env_base_url: Option<String>,
    ) -> ResolvedConfig {
        let base_url = env_base_url
            .or(config.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();

        let timeout = match config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        ResolvedConfig {
            base_url,
            install_root: config
                .install_root
                .unwrap_or_else(|| data_root.join("apps")),
            ledger_path: config
                .ledger_path
                .unwrap_or_else(|| data_root.join(DEFAULT_LEDGER_FILE)),
            shortcut_dir: config.shortcut_dir,
            timeout,
            harden_archive_paths: config.harden_archive_paths.unwrap_or(false),
        }
    }
}

fn default_data_root() -> Result<Utf8PathBuf, ShelfError> {
    ProjectDirs::from("", "", "softshelf")
        .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.data_dir().to_path_buf()).ok())
        .ok_or(ShelfError::MissingHomeDir)
}
