//! Vector Index Module
//!
//! A flat, exact nearest-neighbor index over embedding vectors. Vectors are
//! stored row-major in one buffer, with a parallel sequence of metadata
//! entries: row `i` always belongs to entry `i`. The only way in is
//! [`VectorIndex::push`], which appends to both sides at once.

pub mod embedder;
pub mod search;

pub use embedder::*;

use crate::error::{Error, Result};
use crate::models::FingerprintedEntry;

/// Flat L2 index with positional metadata
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    /// Fixed once the first vector is added
    dimension: Option<usize>,
    /// Row-major vector storage
    vectors: Vec<f32>,
    /// Metadata, position-aligned with `vectors`
    metadata: Vec<FingerprintedEntry>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from entries in order
    pub fn from_entries(entries: Vec<FingerprintedEntry>) -> Result<Self> {
        let mut index = Self::new();
        for entry in entries {
            index.push(entry)?;
        }
        Ok(index)
    }

    /// Append an entry and its vector
    ///
    /// Fails without touching the index when the vector is empty or its
    /// dimension differs from the vectors already stored.
    pub fn push(&mut self, entry: FingerprintedEntry) -> Result<()> {
        let dim = entry.embedding.len();
        if dim == 0 {
            return Err(Error::InvalidParameters(format!(
                "empty embedding for {}",
                entry.path.display()
            )));
        }
        match self.dimension {
            Some(expected) if expected != dim => {
                return Err(Error::InvalidParameters(format!(
                    "embedding for {} has dimension {}, index expects {}",
                    entry.path.display(),
                    dim,
                    expected
                )));
            }
            Some(_) => {}
            None => self.dimension = Some(dim),
        }

        self.vectors.extend_from_slice(&entry.embedding);
        self.metadata.push(entry);
        Ok(())
    }

    /// Number of indexed vectors (always equal to the number of entries)
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Vector at position `i`
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        self.vectors.get(i * dim..(i + 1) * dim)
    }

    /// Metadata at position `i`
    pub fn entry(&self, i: usize) -> Option<&FingerprintedEntry> {
        self.metadata.get(i)
    }

    pub fn entries(&self) -> &[FingerprintedEntry] {
        &self.metadata
    }

    /// Iterate vectors in position order
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        let dim = self.dimension.unwrap_or(1);
        self.vectors.chunks_exact(dim)
    }
}

/// Squared Euclidean distance
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Element-wise arithmetic mean of equally sized vectors
///
/// The result is not renormalized: averaging unit vectors can give a
/// vector shorter than 1, and that length is kept.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return None;
    }

    let mut mean = vec![0.0f32; dim];
    for v in vectors {
        for (acc, x) in mean.iter_mut().zip(v) {
            *acc += x;
        }
    }
    let n = vectors.len() as f32;
    for acc in &mut mean {
        *acc /= n;
    }
    Some(mean)
}

/// L2-normalize in place; zero vectors are left unchanged
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
