//! nearfold
//!
//! Keeps an embedding index over the folders of a root directory and the
//! files inside them, files new content into the folder of its nearest
//! indexed neighbor, and regroups folders by similarity with a transaction
//! log that makes every regrouping reversible.
//!
//! ## Modules
//! - `index` - Incremental, cancellable index build
//! - `store` - Persisted record stores and the embedding cache
//! - `vector` - In-memory vector index, search and embedding backends
//! - `classify` - Nearest-neighbor classification with move-aware paths
//! - `grouping` - Clustering, naming, moves and undo
//! - `tasks` - Single-build supervisor and control events
//! - `services` - Download watcher
//! - `wal` - Transaction log and safe filesystem primitives

pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod extract;
pub mod fingerprint;
pub mod grouping;
pub mod index;
pub mod models;
pub mod services;
pub mod store;
pub mod tasks;
pub mod vector;
pub mod wal;

#[cfg(test)]
mod test_support;

pub use classify::{Category, Classifier};
pub use config::AppConfig;
pub use error::{EmbedError, Error, Result};
pub use events::{ControlEvent, EventBus};
pub use index::{BuildOutcome, BuildStatus, CancelToken, IndexBuilder};
pub use tasks::TaskController;
