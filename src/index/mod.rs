//! Incremental index build
//!
//! Walks the immediate subfolders of a root directory and keeps two stores
//! current: one vector per folder, one vector per contained file. Units
//! whose fingerprint matches the cache are reused without extraction or
//! embedding. Builds are cooperatively cancellable and always flush what
//! they have before returning.
//!
//! ## Modules
//! - `builder` - The walk itself
//! - `cancel` - Cancellation token polled at every checkpoint

pub mod builder;
pub mod cancel;

pub use builder::*;
pub use cancel::CancelToken;

use serde::{Deserialize, Serialize};

/// Phase of a build, as reported in logs and task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    Walking,
    Flushing,
    Done,
    Cancelled,
    Failed,
}

/// How a build ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Done,
    Cancelled,
    Failed,
}

/// Counters collected during a build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStats {
    pub folders_total: usize,
    pub folders_completed: usize,
    pub folders_embedded: usize,
    pub folders_cached: usize,
    pub folders_skipped: usize,
    pub files_embedded: usize,
    pub files_cached: usize,
    pub files_skipped: usize,
}

/// Result of a build run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOutcome {
    pub status: BuildStatus,
    pub stats: BuildStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BuildOutcome {
    pub fn failed(message: impl Into<String>, stats: BuildStats) -> Self {
        Self {
            status: BuildStatus::Failed,
            stats,
            message: Some(message.into()),
        }
    }
}
