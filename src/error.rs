//! Crate-wide error types
//!
//! Unit-level failures (one file that cannot be extracted, one folder that
//! cannot be moved) are handled where they happen and never reach these
//! types. What is left here aborts an operation: persistence failures,
//! rejected parameters and unreadable configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::wal::io::SafeIoError;

/// Errors surfaced by index, grouping and undo operations
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem error outside the atomic-write path
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A store, index or transaction log could not be written
    #[error("Persistence failure: {0}")]
    Persistence(#[from] SafeIoError),

    /// A persisted artifact could not be parsed
    #[error("Malformed data in {path}: {message}")]
    Serialization { path: String, message: String },

    /// Caller supplied parameters that cannot be honored
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    #[error("Extraction failed for {path}: {message}")]
    Extraction { path: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// No transaction log exists to undo
    #[error("Undo log not found: {0}")]
    LogNotFound(String),

    /// The task supervisor is gone or a task could not be joined
    #[error("Task controller error: {0}")]
    TaskController(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl Error {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

/// Errors raised by an embedding backend for a single chunk
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "details")]
pub enum EmbedError {
    /// The model could not be loaded or initialized
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference on a chunk failed
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The backend returned a vector of unexpected size
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_error_serializes_tagged() {
        let err = EmbedError::DimensionMismatch {
            expected: 384,
            actual: 12,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "dimension_mismatch");
        assert_eq!(json["details"]["expected"], 384);
    }

    #[test]
    fn test_error_into_string() {
        let msg: String = Error::InvalidParameters("k must be positive".into()).into();
        assert_eq!(msg, "Invalid parameters: k must be positive");
    }
}
