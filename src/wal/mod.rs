//! Transaction log for reversible grouping
//!
//! Grouping records every move it performs and persists the list once, as
//! a full atomic overwrite, after all moves are done. Undo replays it and
//! deletes it only when every record was restored. While the log exists,
//! classification uses it to map moved folders back to where they were.
//!
//! ## Modules
//! - `io` - Safe I/O utilities (atomic writes, fsync, non-overwriting moves)

pub mod io;

use crate::error::{Error, Result};
use crate::models::MoveRecord;
use chrono::{DateTime, Utc};
use io::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Ordered moves produced by one grouping run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLog {
    pub created_at: DateTime<Utc>,
    pub records: Vec<MoveRecord>,
}

impl TransactionLog {
    pub fn new(records: Vec<MoveRecord>) -> Self {
        Self {
            created_at: Utc::now(),
            records,
        }
    }

    /// Reverse lookup from a move's destination to its origin
    pub fn undo_map(&self) -> HashMap<PathBuf, PathBuf> {
        self.records
            .iter()
            .map(|r| (r.moved_to.clone(), r.moved_from.clone()))
            .collect()
    }
}

/// Owns the transaction log file
#[derive(Debug, Clone)]
pub struct LogManager {
    path: PathBuf,
}

impl LogManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the log; a missing file is [`Error::LogNotFound`]
    pub fn load(&self) -> Result<TransactionLog> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::LogNotFound(self.path.display().to_string()));
            }
            Err(e) => return Err(Error::io(&self.path, e)),
        };

        serde_json::from_str(&raw).map_err(|e| Error::Serialization {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Overwrite the log atomically
    pub fn save(&self, log: &TransactionLog) -> Result<()> {
        let data = serde_json::to_vec_pretty(log).map_err(|e| Error::Serialization {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })?;
        atomic_write(&self.path, &data)?;
        tracing::info!(
            "[Wal] Saved transaction log with {} moves to {}",
            log.records.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&self.path, e)),
        }
    }

    /// Undo map for classification; no log means no remapping
    pub fn undo_map(&self) -> Result<HashMap<PathBuf, PathBuf>> {
        match self.load() {
            Ok(log) => Ok(log.undo_map()),
            Err(Error::LogNotFound(_)) => Ok(HashMap::new()),
            Err(e) => Err(e),
        }
    }
}
