use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use treestore::primitives::pager::DEFAULT_PAGE_SIZE;

/// Settings resolved from the config file, before command line overrides.
#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        if let Some(page_size) = data.store.page_size {
            if page_size == 0 {
                return Err(ConfigError::InvalidPageSize { value: page_size });
            }
        }
        Ok(Self { path, data })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn page_size(&self) -> u32 {
        self.data.store.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn timestamps(&self) -> bool {
        self.data.store.timestamps.unwrap_or(false)
    }

    pub fn fsync(&self) -> bool {
        self.data.store.fsync.unwrap_or(true)
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct RawConfig {
    #[serde(default)]
    store: StoreSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct StoreSection {
    page_size: Option<u32>,
    timestamps: Option<bool>,
    fsync: Option<bool>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read CLI config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("page_size {value} in CLI config is invalid")]
    InvalidPageSize { value: u32 },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("treestore").join("config.toml"))
}
