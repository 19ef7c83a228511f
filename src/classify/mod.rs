//! Nearest-neighbor classification
//!
//! A piece of text is attributed to the folder holding its nearest indexed
//! file. While a grouping transaction log exists, the folder is mapped back
//! through it so classification keeps pointing at a folder's pre-move
//! identity without re-embedding anything.

use crate::error::{EmbedError, Result};
use crate::index::CancelToken;
use crate::store::RecordStore;
use crate::vector::{embed_text, Embedder};
use crate::wal::LogManager;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const UNCATEGORIZED: &str = "Uncategorized";

/// Where a piece of content belongs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Folder(PathBuf),
    Uncategorized,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Folder(path) => write!(f, "{}", path.display()),
            Category::Uncategorized => f.write_str(UNCATEGORIZED),
        }
    }
}

pub struct Classifier {
    file_store: RecordStore,
    undo_log: LogManager,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
}

impl Classifier {
    pub fn new(file_store: RecordStore, undo_log: LogManager, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            file_store,
            undo_log,
            embedder,
            chunk_size: 512,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Classify text; never fails, degrading to [`Category::Uncategorized`]
    pub fn classify(&self, text: &str) -> Category {
        if text.trim().is_empty() {
            return Category::Uncategorized;
        }

        match self.try_classify(text) {
            Ok(category) => category,
            Err(e) => {
                tracing::warn!("[Classifier] Falling back to {}: {}", UNCATEGORIZED, e);
                Category::Uncategorized
            }
        }
    }

    fn try_classify(&self, text: &str) -> Result<Category> {
        let query = embed_text(
            self.embedder.as_ref(),
            text,
            self.chunk_size,
            &CancelToken::new(),
        )?
        .ok_or_else(|| EmbedError::Inference("embedding cancelled".to_string()))?;

        let index = self.file_store.load_index()?;
        let Some(nearest) = index.nearest(&query) else {
            tracing::debug!("[Classifier] File index is empty");
            return Ok(Category::Uncategorized);
        };

        let Some(raw) = nearest.entry.path.parent() else {
            return Ok(Category::Uncategorized);
        };

        let undo_map = self.undo_log.undo_map().unwrap_or_else(|e| {
            tracing::warn!("[Classifier] Ignoring unreadable transaction log: {}", e);
            HashMap::new()
        });

        let resolved = resolve_grouped_path(raw, &undo_map);
        tracing::debug!(
            "[Classifier] Nearest {} (d={:.4}) -> {}",
            nearest.entry.path.display(),
            nearest.distance,
            resolved.display()
        );
        Ok(Category::Folder(resolved))
    }
}

/// Map a path through the undo map (moved-to -> moved-from)
///
/// The nearest ancestor of `raw` (itself included) that is a key of the
/// map is replaced by its value; the remainder is kept. Without a match
/// `raw` is returned unchanged.
pub fn resolve_grouped_path(raw: &Path, undo_map: &HashMap<PathBuf, PathBuf>) -> PathBuf {
    if undo_map.is_empty() {
        return raw.to_path_buf();
    }

    for ancestor in raw.ancestors() {
        if let Some(original) = undo_map.get(ancestor) {
            return match raw.strip_prefix(ancestor) {
                Ok(rest) if rest.as_os_str().is_empty() => original.clone(),
                Ok(rest) => original.join(rest),
                Err(_) => original.clone(),
            };
        }
    }

    raw.to_path_buf()
}
