//! Persisted embedding stores
//!
//! A store is one JSON-lines file; line `i` is the complete entry (vector
//! included) for index position `i`. Vectors and metadata share the file,
//! so they cannot drift apart on disk, and every write replaces the whole
//! file through [`atomic_write`].
//!
//! - [`RecordStore`] reads and writes one such file.
//! - [`EmbeddingCache`] is the path-keyed view used to skip re-embedding.
//! - [`IndexWriter`] accumulates a build's entries and flushes them.

use crate::error::{Error, Result};
use crate::models::FingerprintedEntry;
use crate::vector::VectorIndex;
use crate::wal::io::atomic_write;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// One line-oriented record store on disk
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read every entry in order. An absent or malformed store is an error.
    pub fn read(&self) -> Result<Vec<FingerprintedEntry>> {
        let raw = fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))?;

        raw.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| Error::Serialization {
                    path: self.path.display().to_string(),
                    message: format!("line {}: {}", n + 1, e),
                })
            })
            .collect()
    }

    /// Read the store into a vector index
    pub fn load_index(&self) -> Result<VectorIndex> {
        VectorIndex::from_entries(self.read()?)
    }

    /// Replace the store with `entries`
    pub fn write(&self, entries: &[FingerprintedEntry]) -> Result<()> {
        let mut data = String::new();
        for entry in entries {
            let line = serde_json::to_string(entry).map_err(|e| Error::Serialization {
                path: self.path.display().to_string(),
                message: e.to_string(),
            })?;
            data.push_str(&line);
            data.push('\n');
        }
        atomic_write(&self.path, data.as_bytes())?;
        Ok(())
    }
}

/// Path-keyed view of a store, used to decide what needs re-embedding
#[derive(Debug, Clone, Default)]
pub struct EmbeddingCache {
    entries: HashMap<PathBuf, FingerprintedEntry>,
}

impl EmbeddingCache {
    /// Load a store; an absent or malformed store gives an empty cache
    pub fn load(store: &RecordStore) -> Self {
        if !store.exists() {
            return Self::default();
        }
        match store.read() {
            Ok(entries) => Self::from_entries(entries),
            Err(e) => {
                tracing::warn!("[Cache] ignoring unreadable store: {}", e);
                Self::default()
            }
        }
    }

    pub fn from_entries(entries: Vec<FingerprintedEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.path.clone(), e)).collect(),
        }
    }

    /// True iff an entry exists for `path` with exactly this fingerprint
    pub fn is_valid(&self, path: &Path, fingerprint: &str) -> bool {
        self.get_valid(path, fingerprint).is_some()
    }

    /// The cached entry for `path` if its fingerprint still matches
    pub fn get_valid(&self, path: &Path, fingerprint: &str) -> Option<&FingerprintedEntry> {
        self.entries
            .get(path)
            .filter(|entry| entry.fingerprint == fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entries produced by one build, flushed to a store as a whole
pub struct IndexWriter {
    store: RecordStore,
    cache: EmbeddingCache,
    live: VectorIndex,
    unflushed: usize,
}

impl IndexWriter {
    /// Open a writer, loading the existing store as the cache
    pub fn open(store: RecordStore) -> Self {
        let cache = EmbeddingCache::load(&store);
        Self {
            store,
            cache,
            live: VectorIndex::new(),
            unflushed: 0,
        }
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Entries added since the last flush
    pub fn unflushed(&self) -> usize {
        self.unflushed
    }

    /// Add an entry to the in-memory index
    pub fn push(&mut self, entry: FingerprintedEntry) -> Result<()> {
        self.live.push(entry)?;
        self.unflushed += 1;
        Ok(())
    }

    /// Rewrite the store
    ///
    /// A complete flush writes exactly the entries of this build. A partial
    /// flush (build still running, cancelled or failed) also keeps the
    /// previous store's entries for paths this build has not reached, so
    /// stopping early never discards earlier work.
    pub fn flush(&mut self, complete: bool) -> Result<usize> {
        let mut entries: Vec<FingerprintedEntry> = self.live.entries().to_vec();

        if !complete {
            let seen: HashSet<&Path> = self
                .live
                .entries()
                .iter()
                .map(|e| e.path.as_path())
                .collect();
            let mut carried: Vec<&FingerprintedEntry> = self
                .cache
                .entries
                .values()
                .filter(|e| !seen.contains(e.path.as_path()))
                .collect();
            carried.sort_by(|a, b| a.path.cmp(&b.path));
            entries.extend(carried.into_iter().cloned());
        }

        self.store.write(&entries)?;
        self.unflushed = 0;
        tracing::info!(
            "[Store] Flushed {} entries to {}",
            entries.len(),
            self.store.path().display()
        );
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn folder(root: &Path, name: &str, hash: &str) -> FingerprintedEntry {
        FingerprintedEntry::folder(&root.join(name), hash.into(), vec![0.6, 0.8])
    }

    #[test]
    fn test_write_then_read_preserves_order() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("folder_index.jsonl"));
        let entries = vec![folder(dir.path(), "b", "1"), folder(dir.path(), "a", "2")];

        store.write(&entries).unwrap();

        assert_eq!(store.read().unwrap(), entries);
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn test_cache_absent_or_malformed_is_empty() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("missing.jsonl"));
        assert!(EmbeddingCache::load(&store).is_empty());

        fs::write(store.path(), "{\"path\": 12}\nnot json\n").unwrap();
        assert!(EmbeddingCache::load(&store).is_empty());
        assert!(store.read().is_err());
    }

    #[test]
    fn test_is_valid_requires_matching_fingerprint() {
        let root = Path::new("/d");
        let cache = EmbeddingCache::from_entries(vec![folder(root, "Taxes", "abc")]);

        assert!(cache.is_valid(&root.join("Taxes"), "abc"));
        assert!(!cache.is_valid(&root.join("Taxes"), "abd"));
        assert!(!cache.is_valid(&root.join("Other"), "abc"));
    }

    #[test]
    fn test_partial_flush_carries_unvisited_entries() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("folder_index.jsonl"));
        store
            .write(&[folder(dir.path(), "old", "1"), folder(dir.path(), "kept", "2")])
            .unwrap();

        let mut writer = IndexWriter::open(store.clone());
        writer.push(folder(dir.path(), "kept", "3")).unwrap();

        assert_eq!(writer.flush(false).unwrap(), 2);
        let on_disk = store.read().unwrap();
        assert_eq!(on_disk[0].fingerprint, "3");
        assert_eq!(on_disk[1].path, dir.path().join("old"));

        assert_eq!(writer.flush(true).unwrap(), 1);
        assert_eq!(store.read().unwrap().len(), 1);
        assert_eq!(writer.unflushed(), 0);
    }

    #[test]
    fn test_load_index_aligns_vectors_and_metadata() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("file_index.jsonl"));
        store
            .write(&[folder(dir.path(), "x", "1"), folder(dir.path(), "y", "2")])
            .unwrap();

        let index = store.load_index().unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.vectors().count(), index.entries().len());
    }
}
