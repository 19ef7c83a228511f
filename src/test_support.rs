//! Deterministic collaborators for tests

use crate::error::{EmbedError, Error, Result};
use crate::extract::Extractor;
use crate::index::CancelToken;
use crate::vector::{Embedder, HashingEmbedder};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Hashing embedder that counts calls and can trip a cancel token
#[derive(Default)]
pub struct CountingEmbedder {
    inner: HashingEmbedder,
    model: Option<String>,
    negate: bool,
    pub calls: AtomicUsize,
    cancel_after: Mutex<Option<(usize, CancelToken)>>,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A different model of the same dimension: sign-flipped vectors
    pub fn other_model(model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            negate: true,
            ..Self::default()
        }
    }

    /// Cancel `token` once `calls` chunks have been embedded
    pub fn cancel_after(&self, calls: usize, token: CancelToken) {
        *self.cancel_after.lock().unwrap() = Some((calls, token));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Embedder for CountingEmbedder {
    fn model_id(&self) -> &str {
        self.model.as_deref().unwrap_or(self.inner.model_id())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed(&self, chunk: &str) -> Result<Vec<f32>, EmbedError> {
        if chunk.contains("EMBED_FAIL") {
            return Err(EmbedError::Inference("poisoned chunk".into()));
        }
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = self.cancel_after.lock().unwrap().as_ref() {
            if n >= *limit {
                token.cancel();
            }
        }
        let mut vector = self.inner.embed(chunk)?;
        if self.negate {
            vector.iter_mut().for_each(|x| *x = -*x);
        }
        Ok(vector)
    }
}

/// Reads files as UTF-8 and counts calls; `.bad` files fail
#[derive(Default)]
pub struct CountingExtractor {
    pub calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Extractor for CountingExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if path.extension().is_some_and(|e| e == "bad") {
            return Err(Error::Extraction {
                path: path.display().to_string(),
                message: "unsupported test format".into(),
            });
        }
        fs::read(path)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .map_err(|e| Error::io(path, e))
    }
}

/// Write `content` to `root/rel`, creating parents
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}
