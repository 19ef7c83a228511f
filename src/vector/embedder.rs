//! Embedding backends
//!
//! An [`Embedder`] turns one bounded chunk of text into a fixed-dimension,
//! L2-normalized vector. [`embed_text`] handles arbitrary-length text on top
//! of that: fixed-size slices, one embedding per slice, mean of the results.

use super::{l2_normalize, mean_vector};
use crate::error::EmbedError;
use crate::index::CancelToken;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Embedding dimension of the supported models
pub const EMBEDDING_DIM: usize = 384;

/// A text embedding model that handles one chunk at a time
pub trait Embedder: Send + Sync {
    /// Identifies the model; vectors from different models never mix
    fn model_id(&self) -> &str;

    /// Output dimension
    fn dimension(&self) -> usize;

    /// Embed a single chunk (at most the configured chunk size)
    fn embed(&self, chunk: &str) -> Result<Vec<f32>, EmbedError>;
}

/// Supported embedding models
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingModelType {
    /// All-MiniLM-L6-v2: fast, good quality, 384 dimensions
    #[default]
    AllMiniLmL6V2,
    /// BGE-Small-EN-v1.5: compact, English-focused
    BgeSmallEnV15,
}

impl EmbeddingModelType {
    pub fn id(self) -> &'static str {
        match self {
            EmbeddingModelType::AllMiniLmL6V2 => "all_mini_lm_l6_v2",
            EmbeddingModelType::BgeSmallEnV15 => "bge_small_en_v15",
        }
    }
}

#[cfg(feature = "fastembed")]
impl EmbeddingModelType {
    /// Convert to fastembed's EmbeddingModel enum
    pub fn to_fastembed_model(self) -> fastembed::EmbeddingModel {
        match self {
            EmbeddingModelType::AllMiniLmL6V2 => fastembed::EmbeddingModel::AllMiniLML6V2,
            EmbeddingModelType::BgeSmallEnV15 => fastembed::EmbeddingModel::BGESmallENV15,
        }
    }
}

/// Collapse runs of whitespace into single spaces
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into contiguous slices of at most `chunk_size` characters
///
/// A `chunk_size` of zero yields the whole text as one slice.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    if chunk_size == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect())
        .collect()
}

/// Embed text of any length
///
/// Each slice is whitespace-cleaned and embedded on its own; the result is
/// the mean of the slice vectors (not renormalized). The token is checked
/// before every slice and `Ok(None)` is returned once it is set, which
/// callers must treat as "cancelled", not as a failure.
pub fn embed_text(
    embedder: &dyn Embedder,
    text: &str,
    chunk_size: usize,
    cancel: &CancelToken,
) -> Result<Option<Vec<f32>>, EmbedError> {
    let mut vectors = Vec::new();

    for chunk in chunk_text(text, chunk_size) {
        if cancel.is_cancelled() {
            tracing::debug!("[Embedder] cancel detected between chunks");
            return Ok(None);
        }

        let cleaned = clean_text(&chunk);
        if cleaned.is_empty() {
            continue;
        }

        let vector = embedder.embed(&cleaned)?;
        if vector.len() != embedder.dimension() {
            return Err(EmbedError::DimensionMismatch {
                expected: embedder.dimension(),
                actual: vector.len(),
            });
        }
        vectors.push(vector);
    }

    mean_vector(&vectors)
        .map(Some)
        .ok_or_else(|| EmbedError::Inference("no embeddable content".to_string()))
}

/// Dependency-free bag-of-words embedder
///
/// Hashes lowercased word tokens into signed buckets (FNV-1a, so vectors
/// are stable across builds and platforms) and L2-normalizes the result.
/// Used when no model backend is compiled in.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    id: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            id: format!("hashing_{}", dimension),
            dimension,
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, chunk: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in chunk
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// Local sentence-embedding model via fastembed
///
/// Note: This downloads the model on first use (~100MB for AllMiniLmL6V2)
#[cfg(feature = "fastembed")]
pub struct FastEmbedder {
    model: fastembed::TextEmbedding,
    model_type: EmbeddingModelType,
}

#[cfg(feature = "fastembed")]
impl FastEmbedder {
    pub fn new(model_type: EmbeddingModelType) -> Result<Self, EmbedError> {
        let options = fastembed::InitOptions::new(model_type.to_fastembed_model())
            .with_show_download_progress(false);
        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|e| EmbedError::ModelUnavailable(e.to_string()))?;
        tracing::info!("[Embedder] Loaded fastembed model {:?}", model_type);
        Ok(Self { model, model_type })
    }
}

#[cfg(feature = "fastembed")]
impl Embedder for FastEmbedder {
    fn model_id(&self) -> &str {
        self.model_type.id()
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&self, chunk: &str) -> Result<Vec<f32>, EmbedError> {
        let mut embeddings = self
            .model
            .embed(vec![chunk], None)
            .map_err(|e| EmbedError::Inference(e.to_string()))?;
        let mut vector = embeddings
            .pop()
            .ok_or_else(|| EmbedError::Inference("model returned no embedding".to_string()))?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// The embedder compiled into this build
#[cfg(feature = "fastembed")]
pub fn load_embedder(model_type: EmbeddingModelType) -> Result<Arc<dyn Embedder>, EmbedError> {
    Ok(Arc::new(FastEmbedder::new(model_type)?))
}

/// The embedder compiled into this build
#[cfg(not(feature = "fastembed"))]
pub fn load_embedder(model_type: EmbeddingModelType) -> Result<Arc<dyn Embedder>, EmbedError> {
    tracing::warn!(
        "[Embedder] Built without the fastembed feature, using the bag-of-words hashing embedder instead of {:?}",
        model_type
    );
    Ok(Arc::new(HashingEmbedder::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingEmbedder;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_chunk_text_fixed_slices() {
        let chunks = chunk_text("abcdefg", 3);
        assert_eq!(chunks, vec!["abc", "def", "g"]);
        assert_eq!(chunk_text("abc", 0), vec!["abc"]);
    }

    #[test]
    fn test_chunk_text_is_char_based() {
        let chunks = chunk_text("ééé", 2);
        assert_eq!(chunks, vec!["éé", "é"]);
    }

    #[test]
    fn test_embed_text_averages_chunks() {
        let embedder = CountingEmbedder::new();
        let text = "apple ".repeat(200);
        let vector = embed_text(&embedder, &text, 64, &CancelToken::new())
            .unwrap()
            .unwrap();

        assert_eq!(vector.len(), embedder.dimension());
        assert!(embedder.calls.load(Ordering::SeqCst) > 1);
    }

    struct AxisEmbedder;

    impl Embedder for AxisEmbedder {
        fn model_id(&self) -> &str {
            "axis"
        }

        fn dimension(&self) -> usize {
            2
        }

        fn embed(&self, chunk: &str) -> Result<Vec<f32>, EmbedError> {
            if chunk.contains("alpha") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    #[test]
    fn test_embed_text_mean_of_unit_vectors_keeps_short_norm() {
        // Two slices that embed to orthogonal unit vectors
        let text = format!("{}{}", "alpha ".repeat(10), "omega ".repeat(10));
        let vector = embed_text(&AxisEmbedder, &text, 60, &CancelToken::new())
            .unwrap()
            .unwrap();

        assert_eq!(vector, vec![0.5, 0.5]);
    }

    #[test]
    fn test_embed_text_cancelled_returns_none() {
        let embedder = CountingEmbedder::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = embed_text(&embedder, "some text", 4, &cancel).unwrap();
        assert!(result.is_none());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_embed_text_blank_is_error() {
        let embedder = CountingEmbedder::new();
        assert!(embed_text(&embedder, "   \n\t ", 4, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_hashing_embedder_normalized_and_stable() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("Quarterly tax return").unwrap();
        let b = embedder.embed("quarterly TAX return").unwrap();

        assert_eq!(a, b);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
