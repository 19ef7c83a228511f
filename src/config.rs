//! Application configuration
//!
//! Loaded from `<config_dir>/nearfold/config.json` (or an explicit path),
//! then overridden by `NEARFOLD_*` environment variables. Every field has a
//! default, so a missing file is not an error.

use crate::error::{Error, Result};
use crate::store::RecordStore;
use crate::vector::EmbeddingModelType;
use crate::wal::LogManager;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const FOLDER_STORE_FILE: &str = "folder_index.jsonl";
pub const FILE_STORE_FILE: &str = "file_index.jsonl";
pub const UNDO_LOG_FILE: &str = "grouping_undo_log.json";

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Directory whose immediate subfolders are indexed and grouped
    pub root_dir: PathBuf,
    /// Directory watched for new files to classify
    pub watch_dir: PathBuf,
    /// Where stores and the transaction log live
    pub data_dir: PathBuf,
    /// Where group directories are created (defaults to `root_dir`)
    pub group_base_dir: Option<PathBuf>,
    /// Characters per embedding chunk
    pub chunk_size: usize,
    /// Newly embedded files between file-store flushes
    pub flush_interval: usize,
    /// Seed for clustering
    pub cluster_seed: u64,
    /// Upper bound on clustering iterations
    pub max_iterations: usize,
    /// Embedding model used when a model backend is compiled in
    pub embedding_model: EmbeddingModelType,
    /// llama.cpp-compatible completion server used to name groups
    pub naming_endpoint: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root_dir: dirs::desktop_dir().unwrap_or_else(|| home.join("Desktop")),
            watch_dir: dirs::download_dir().unwrap_or_else(|| home.join("Downloads")),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| home.join(".local").join("share"))
                .join("nearfold"),
            group_base_dir: None,
            chunk_size: 512,
            flush_interval: 10,
            cluster_seed: 42,
            max_iterations: 300,
            embedding_model: EmbeddingModelType::default(),
            naming_endpoint: None,
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nearfold").join("config.json"))
    }

    /// Load from `path` (or the default location) and apply env overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let raw = fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
                serde_json::from_str(&raw)
                    .map_err(|e| Error::Config(format!("{}: {}", p.display(), e)))?
            }
            _ => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `NEARFOLD_*` overrides from a variable lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("NEARFOLD_ROOT") {
            self.root_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("NEARFOLD_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("NEARFOLD_WATCH_DIR") {
            self.watch_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("NEARFOLD_NAMING_ENDPOINT") {
            self.naming_endpoint = Some(v).filter(|s| !s.trim().is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_interval == 0 {
            return Err(Error::Config("flushInterval must be at least 1".into()));
        }
        if self.max_iterations == 0 {
            return Err(Error::Config("maxIterations must be at least 1".into()));
        }
        Ok(())
    }

    pub fn group_base_dir(&self) -> &Path {
        self.group_base_dir.as_deref().unwrap_or(&self.root_dir)
    }

    pub fn folder_store(&self) -> RecordStore {
        RecordStore::new(self.data_dir.join(FOLDER_STORE_FILE))
    }

    pub fn file_store(&self) -> RecordStore {
        RecordStore::new(self.data_dir.join(FILE_STORE_FILE))
    }

    pub fn undo_log(&self) -> LogManager {
        LogManager::new(self.data_dir.join(UNDO_LOG_FILE))
    }

    /// Config rooted in a scratch directory, for tests
    #[cfg(test)]
    pub(crate) fn for_dirs(root: &Path, data: &Path) -> Self {
        Self {
            root_dir: root.to_path_buf(),
            watch_dir: root.to_path_buf(),
            data_dir: data.to_path_buf(),
            ..Self::default()
        }
    }
}
