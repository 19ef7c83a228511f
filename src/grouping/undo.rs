//! Transaction log replay

use crate::error::{Error, Result};
use crate::wal::io::move_path;
use crate::wal::LogManager;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UndoStatus {
    Success,
    Partial,
    LogNotFound,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoReport {
    pub status: UndoStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl UndoReport {
    /// Report for an undo that could not run at all
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: UndoStatus::Error,
            message: message.into(),
            errors: Vec::new(),
        }
    }
}

/// Moves grouped folders back to where they came from
pub struct UndoEngine {
    undo_log: LogManager,
}

impl UndoEngine {
    pub fn new(undo_log: LogManager) -> Self {
        Self { undo_log }
    }

    /// Replay the log in order
    ///
    /// A record whose source is gone or whose destination is occupied is
    /// reported and skipped. The log is deleted only when every record was
    /// restored, so a partial undo can be retried.
    pub async fn undo(&self, progress: &(dyn Fn(usize, usize) + Send + Sync)) -> Result<UndoReport> {
        let log = match self.undo_log.load() {
            Ok(log) => log,
            Err(Error::LogNotFound(path)) => {
                tracing::warn!("[Undo] Transaction log not found: {}", path);
                return Ok(UndoReport {
                    status: UndoStatus::LogNotFound,
                    message: "Undo log not found.".to_string(),
                    errors: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let total = log.records.len();
        let mut errors = Vec::new();

        for (i, record) in log.records.into_iter().enumerate() {
            let (src, dst) = (record.moved_to, record.moved_from);
            tracing::info!("[Undo] Moving back {} -> {}", src.display(), dst.display());

            if !src.exists() {
                tracing::warn!("[Undo] Source not found: {}", src.display());
                errors.push(format!("Source missing: {}", src.display()));
            } else if dst.exists() {
                tracing::warn!("[Undo] Destination exists, skipping: {}", dst.display());
                errors.push(format!("Destination exists: {}", dst.display()));
            } else {
                let (from, to) = (src.clone(), dst.clone());
                let moved = tokio::task::spawn_blocking(move || move_path(&from, &to))
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|r| r.map_err(|e| e.to_string()));
                if let Err(e) = moved {
                    tracing::error!("[Undo] Move failed for {}: {}", src.display(), e);
                    errors.push(e);
                }
            }

            progress(i + 1, total);
        }

        if errors.is_empty() {
            self.undo_log.delete()?;
            tracing::info!("[Undo] Restored {} folders, log removed", total);
            Ok(UndoReport {
                status: UndoStatus::Success,
                message: "Undo completed successfully.".to_string(),
                errors,
            })
        } else {
            tracing::warn!("[Undo] {} of {} records failed, log kept", errors.len(), total);
            Ok(UndoReport {
                status: UndoStatus::Partial,
                message: "Some items could not be undone.".to_string(),
                errors,
            })
        }
    }
}
