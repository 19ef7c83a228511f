//! Index Builder
//!
//! `Idle -> Walking -> (per folder, per file) -> Flushing -> Done | Cancelled | Failed`
//!
//! For each immediate subfolder of the root (directory-listing order):
//! 1. Fingerprint the folder. On a cache hit reuse its vector; otherwise
//!    extract and concatenate the text of every contained file and embed
//!    it once. The folder store is flushed right after each new folder
//!    embedding.
//! 2. Walk the folder's files. Cache hits are reused; misses are
//!    extracted and embedded. The file store is flushed every
//!    `flush_interval` newly embedded files.
//! 3. Report `(folders_completed, folders_total)`.
//!
//! A unit whose extraction or embedding fails is logged and skipped.
//! Whatever the outcome, both stores are flushed before returning; only a
//! failed write turns the run into `Failed`.

use super::{BuildOutcome, BuildPhase, BuildStats, BuildStatus, CancelToken};
use crate::error::Error;
use crate::extract::Extractor;
use crate::fingerprint::{fingerprint_file, fingerprint_folder};
use crate::models::FingerprintedEntry;
use crate::store::{IndexWriter, RecordStore};
use crate::vector::{embed_text, Embedder};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Why the walk stopped before visiting every folder
enum Halt {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Halt {
    fn from(err: Error) -> Self {
        Halt::Failed(err)
    }
}

/// Result of embedding one unit
enum Embedded {
    Vector(Vec<f32>),
    Skipped,
}

/// Drives fingerprinting, extraction, embedding and store updates
#[derive(Clone)]
pub struct IndexBuilder {
    folder_store: RecordStore,
    file_store: RecordStore,
    extractor: Arc<dyn Extractor>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    flush_interval: usize,
}

impl IndexBuilder {
    pub fn new(
        folder_store: RecordStore,
        file_store: RecordStore,
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            folder_store,
            file_store,
            extractor,
            embedder,
            chunk_size: 512,
            flush_interval: 10,
        }
    }

    /// Characters per embedding chunk
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Newly embedded files between file-store flushes (at least 1)
    pub fn with_flush_interval(mut self, flush_interval: usize) -> Self {
        self.flush_interval = flush_interval.max(1);
        self
    }

    /// Build or refresh the index for `root`
    pub async fn run(
        &self,
        root: &Path,
        cancel: &CancelToken,
        progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> BuildOutcome {
        let mut run = Run {
            builder: self,
            cancel,
            folders: IndexWriter::open(self.folder_store.clone()),
            files: IndexWriter::open(self.file_store.clone()),
            stats: BuildStats::default(),
            embedded_since_flush: 0,
        };

        tracing::info!(
            "[IndexBuilder] {:?} -> {:?}: {} (cached folders: {}, cached files: {})",
            BuildPhase::Idle,
            BuildPhase::Walking,
            root.display(),
            run.folders.cache().len(),
            run.files.cache().len()
        );

        let walked = run.walk(root, progress).await;

        tracing::info!("[IndexBuilder] {:?}", BuildPhase::Flushing);
        let complete = walked.is_ok();
        let flushed = run
            .folders
            .flush(complete)
            .and_then(|_| run.files.flush(complete));

        let stats = run.stats;
        let outcome = match (walked, flushed) {
            (_, Err(e)) => BuildOutcome::failed(format!("failed to persist index: {}", e), stats),
            (Ok(()), Ok(_)) => BuildOutcome {
                status: BuildStatus::Done,
                stats,
                message: None,
            },
            (Err(Halt::Cancelled), Ok(_)) => BuildOutcome {
                status: BuildStatus::Cancelled,
                stats,
                message: None,
            },
            (Err(Halt::Failed(e)), Ok(_)) => BuildOutcome::failed(e.to_string(), stats),
        };

        let phase = match outcome.status {
            BuildStatus::Done => BuildPhase::Done,
            BuildStatus::Cancelled => BuildPhase::Cancelled,
            BuildStatus::Failed => BuildPhase::Failed,
        };
        tracing::info!(
            "[IndexBuilder] {:?}: {} folders embedded, {} cached, {} files embedded, {} cached",
            phase,
            outcome.stats.folders_embedded,
            outcome.stats.folders_cached,
            outcome.stats.files_embedded,
            outcome.stats.files_cached
        );
        if let Some(ref message) = outcome.message {
            tracing::error!("[IndexBuilder] {}", message);
        }

        outcome
    }
}

/// State of one build run
struct Run<'a> {
    builder: &'a IndexBuilder,
    cancel: &'a CancelToken,
    folders: IndexWriter,
    files: IndexWriter,
    stats: BuildStats,
    embedded_since_flush: usize,
}

impl Run<'_> {
    fn checkpoint(&self) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn walk(
        &mut self,
        root: &Path,
        progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<(), Halt> {
        let folders = list_folders(root)?;
        self.stats.folders_total = folders.len();
        tracing::info!("[IndexBuilder] Found {} folders", folders.len());

        for folder in folders {
            self.checkpoint()?;

            let texts = self.index_folder(&folder).await?;
            self.index_files(&folder, texts).await?;

            self.stats.folders_completed += 1;
            progress(self.stats.folders_completed, self.stats.folders_total);
        }

        Ok(())
    }

    /// Folder-level step. Returns the file texts extracted along the way so
    /// the file step does not extract them twice.
    async fn index_folder(&mut self, folder: &Path) -> Result<HashMap<PathBuf, String>, Halt> {
        let fingerprint = {
            let owned = folder.to_path_buf();
            match off_thread(move || fingerprint_folder(&owned)).await {
                Ok(fp) => fp,
                Err(e) => {
                    tracing::warn!("[IndexBuilder] Skipping folder {}: {}", folder.display(), e);
                    self.stats.folders_skipped += 1;
                    return Ok(HashMap::new());
                }
            }
        };

        if let Some(cached) = self.cache_hit(&self.folders, folder, &fingerprint) {
            self.folders.push(cached)?;
            self.stats.folders_cached += 1;
            tracing::debug!("[IndexBuilder] Folder cached: {}", folder.display());
            return Ok(HashMap::new());
        }

        let mut texts = HashMap::new();
        let mut parts = Vec::new();
        for file in list_files(folder).await {
            self.checkpoint()?;
            let text = self.extract(&file).await;
            self.checkpoint()?;
            if !text.trim().is_empty() {
                parts.push(text.clone());
            }
            texts.insert(file, text);
        }

        let combined = parts.join("\n");
        if combined.trim().is_empty() {
            tracing::warn!("[IndexBuilder] Skipped empty folder: {}", folder.display());
            self.stats.folders_skipped += 1;
            return Ok(texts);
        }

        match self.embed(combined, folder).await? {
            Embedded::Vector(vector) => {
                let entry = FingerprintedEntry::folder(folder, fingerprint, vector)
                    .with_model(self.builder.embedder.model_id());
                self.folders.push(entry)?;
                self.folders.flush(false)?;
                self.stats.folders_embedded += 1;
                tracing::info!("[IndexBuilder] Embedded folder: {}", folder.display());
            }
            Embedded::Skipped => self.stats.folders_skipped += 1,
        }

        Ok(texts)
    }

    /// File-level step for every file under `folder`
    async fn index_files(
        &mut self,
        folder: &Path,
        mut texts: HashMap<PathBuf, String>,
    ) -> Result<(), Halt> {
        for file in list_files(folder).await {
            self.checkpoint()?;

            let fingerprint = {
                let owned = file.clone();
                match off_thread(move || fingerprint_file(&owned)).await {
                    Ok(fp) => fp,
                    Err(e) => {
                        tracing::warn!("[IndexBuilder] Skipping file {}: {}", file.display(), e);
                        self.stats.files_skipped += 1;
                        continue;
                    }
                }
            };

            if let Some(cached) = self.cache_hit(&self.files, &file, &fingerprint) {
                self.files.push(cached)?;
                self.stats.files_cached += 1;
                continue;
            }

            let text = match texts.remove(&file) {
                Some(text) => text,
                None => {
                    self.checkpoint()?;
                    self.extract(&file).await
                }
            };
            self.checkpoint()?;

            if text.trim().is_empty() {
                self.stats.files_skipped += 1;
                continue;
            }

            match self.embed(text, &file).await? {
                Embedded::Vector(vector) => {
                    let entry = FingerprintedEntry::file(&file, folder, fingerprint, vector)
                        .with_model(self.builder.embedder.model_id());
                    self.files.push(entry)?;
                    self.stats.files_embedded += 1;
                    self.embedded_since_flush += 1;
                    tracing::debug!("[IndexBuilder] Embedded file: {}", file.display());

                    if self.embedded_since_flush >= self.builder.flush_interval {
                        self.files.flush(false)?;
                        self.embedded_since_flush = 0;
                    }
                }
                Embedded::Skipped => self.stats.files_skipped += 1,
            }
        }

        Ok(())
    }

    /// Cached entry for `path` if it was embedded from this content by the
    /// current model
    fn cache_hit(
        &self,
        writer: &IndexWriter,
        path: &Path,
        fingerprint: &str,
    ) -> Option<FingerprintedEntry> {
        let embedder = &self.builder.embedder;
        writer
            .cache()
            .get_valid(path, fingerprint)
            .filter(|entry| entry.model.as_deref() == Some(embedder.model_id()))
            .filter(|entry| entry.embedding.len() == embedder.dimension())
            .cloned()
    }

    /// Extract text off the async runtime; failures become empty text
    async fn extract(&self, path: &Path) -> String {
        let extractor = Arc::clone(&self.builder.extractor);
        let owned = path.to_path_buf();
        match off_thread(move || extractor.extract(&owned)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!("[IndexBuilder] extract failed for {}: {}", path.display(), e);
                String::new()
            }
            Err(e) => {
                tracing::warn!("[IndexBuilder] extract crashed for {}: {}", path.display(), e);
                String::new()
            }
        }
    }

    /// Embed text off the async runtime, checking the token around the call
    async fn embed(&self, text: String, unit: &Path) -> Result<Embedded, Halt> {
        self.checkpoint()?;

        let embedder = Arc::clone(&self.builder.embedder);
        let cancel = self.cancel.clone();
        let chunk_size = self.builder.chunk_size;
        let result =
            off_thread(move || embed_text(embedder.as_ref(), &text, chunk_size, &cancel)).await;

        self.checkpoint()?;

        match result {
            Ok(Ok(Some(vector))) => Ok(Embedded::Vector(vector)),
            Ok(Ok(None)) => Err(Halt::Cancelled),
            Ok(Err(e)) => {
                tracing::warn!("[IndexBuilder] embedding failed for {}: {}", unit.display(), e);
                Ok(Embedded::Skipped)
            }
            Err(e) => {
                tracing::warn!("[IndexBuilder] embedding crashed for {}: {}", unit.display(), e);
                Ok(Embedded::Skipped)
            }
        }
    }
}

/// Run blocking work on the blocking pool
async fn off_thread<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| format!("worker task failed: {}", e))
}

/// Immediate, non-hidden subdirectories of `root` in listing order
fn list_folders(root: &Path) -> Result<Vec<PathBuf>, Error> {
    let entries = fs::read_dir(root).map_err(|e| Error::io(root, e))?;

    Ok(entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.path())
        .collect())
}

/// Regular files under `folder`, recursively, in file-name order
async fn list_files(folder: &Path) -> Vec<PathBuf> {
    let folder = folder.to_path_buf();
    off_thread(move || {
        WalkDir::new(&folder)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    })
    .await
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_file, CountingEmbedder, CountingExtractor};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        root: TempDir,
        data: TempDir,
        extractor: Arc<CountingExtractor>,
        embedder: Arc<CountingEmbedder>,
    }

    impl Fixture {
        fn new() -> Self {
            let root = tempdir().unwrap();
            write_file(root.path(), "Recipes/soup.txt", "tomato soup with basil and garlic");
            write_file(root.path(), "Recipes/bread.md", "sourdough bread starter flour water");
            write_file(root.path(), "Taxes/2023/w2.txt", "wages withholding federal tax form");
            write_file(root.path(), "Taxes/receipt.txt", "deductible donation receipt");
            Self {
                root,
                data: tempdir().unwrap(),
                extractor: Arc::new(CountingExtractor::new()),
                embedder: Arc::new(CountingEmbedder::new()),
            }
        }

        fn folder_store(&self) -> RecordStore {
            RecordStore::new(self.data.path().join("folder_index.jsonl"))
        }

        fn file_store(&self) -> RecordStore {
            RecordStore::new(self.data.path().join("file_index.jsonl"))
        }

        fn builder(&self) -> IndexBuilder {
            self.builder_using(self.embedder.clone())
        }

        fn builder_using(&self, embedder: Arc<dyn Embedder>) -> IndexBuilder {
            IndexBuilder::new(
                self.folder_store(),
                self.file_store(),
                self.extractor.clone(),
                embedder,
            )
            .with_chunk_size(16)
            .with_flush_interval(2)
        }

        fn stored(store: &RecordStore) -> usize {
            store.read().map(|entries| entries.len()).unwrap_or(0)
        }

        async fn run(&self, cancel: &CancelToken) -> BuildOutcome {
            self.builder().run(self.root.path(), cancel, &|_, _| {}).await
        }

        fn snapshot(&self) -> (String, String) {
            (
                fs::read_to_string(self.folder_store().path()).unwrap_or_default(),
                fs::read_to_string(self.file_store().path()).unwrap_or_default(),
            )
        }
    }

    #[tokio::test]
    async fn test_first_build_indexes_folders_and_files() {
        let fx = Fixture::new();
        let outcome = fx.run(&CancelToken::new()).await;

        assert_eq!(outcome.status, BuildStatus::Done);
        assert_eq!(outcome.stats.folders_embedded, 2);
        assert_eq!(outcome.stats.files_embedded, 4);

        let folders = fx.folder_store().load_index().unwrap();
        let files = fx.file_store().load_index().unwrap();
        assert_eq!(folders.len(), 2);
        assert_eq!(files.len(), 4);

        let w2 = files
            .entries()
            .iter()
            .find(|e| e.name() == "w2.txt")
            .unwrap();
        assert_eq!(
            w2.aux,
            crate::models::EntryAux::File {
                file: "w2.txt".into(),
                root_folder: fx.root.path().join("Taxes"),
            }
        );
    }

    #[tokio::test]
    async fn test_second_build_is_all_cache_hits() {
        let fx = Fixture::new();
        fx.run(&CancelToken::new()).await;
        let before = fx.snapshot();
        let extract_calls = fx.extractor.calls();
        let embed_calls = fx.embedder.calls();

        let outcome = fx.run(&CancelToken::new()).await;

        assert_eq!(outcome.status, BuildStatus::Done);
        assert_eq!(outcome.stats.folders_cached, 2);
        assert_eq!(outcome.stats.files_cached, 4);
        assert_eq!(fx.extractor.calls(), extract_calls);
        assert_eq!(fx.embedder.calls(), embed_calls);
        assert_eq!(fx.snapshot(), before);
    }

    #[tokio::test]
    async fn test_changed_file_updates_only_its_entries() {
        let fx = Fixture::new();
        fx.run(&CancelToken::new()).await;
        let folders_before = fx.folder_store().read().unwrap();
        let files_before = fx.file_store().read().unwrap();

        write_file(fx.root.path(), "Recipes/soup.txt", "lentil soup with cumin");
        let outcome = fx.run(&CancelToken::new()).await;

        assert_eq!(outcome.stats.folders_embedded, 1);
        assert_eq!(outcome.stats.files_embedded, 1);

        let folders_after = fx.folder_store().read().unwrap();
        let files_after = fx.file_store().read().unwrap();
        for before in &folders_before {
            let after = folders_after.iter().find(|e| e.path == before.path).unwrap();
            if before.name() == "Recipes" {
                assert_ne!(after, before);
            } else {
                assert_eq!(after, before);
            }
        }
        for before in &files_before {
            let after = files_after.iter().find(|e| e.path == before.path).unwrap();
            if before.name() == "soup.txt" {
                assert_ne!(after.fingerprint, before.fingerprint);
            } else {
                assert_eq!(after, before);
            }
        }
    }

    #[tokio::test]
    async fn test_blank_and_failing_units_are_skipped() {
        let fx = Fixture::new();
        write_file(fx.root.path(), "Empty/blank.txt", "   \n\t ");
        write_file(fx.root.path(), "Recipes/scan.bad", "unreadable");
        write_file(fx.root.path(), "Recipes/poison.txt", "EMBED_FAIL");

        let outcome = fx.run(&CancelToken::new()).await;

        assert_eq!(outcome.status, BuildStatus::Done);
        let folders = fx.folder_store().read().unwrap();
        assert!(!folders.iter().any(|e| e.name() == "Empty"));
        let files = fx.file_store().read().unwrap();
        assert!(!files.iter().any(|e| e.name() == "blank.txt"));
        assert!(!files.iter().any(|e| e.name() == "scan.bad"));
        assert!(!files.iter().any(|e| e.name() == "poison.txt"));
        assert!(files.iter().any(|e| e.name() == "soup.txt"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_keeps_previous_store() {
        let fx = Fixture::new();
        fx.run(&CancelToken::new()).await;
        let before = fx.snapshot();

        write_file(fx.root.path(), "Recipes/soup.txt", "changed");
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = fx.run(&cancel).await;

        assert_eq!(outcome.status, BuildStatus::Cancelled);
        assert_eq!(outcome.stats.folders_completed, 0);
        let after_folders = fx.folder_store().read().unwrap();
        let before_folders: Vec<FingerprintedEntry> = before
            .0
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(after_folders.len(), before_folders.len());
        for entry in &before_folders {
            assert!(after_folders.contains(entry));
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_build_persists_finished_units() {
        let fx = Fixture::new();
        let cancel = CancelToken::new();
        // One call per unit: folder, its two files, then the second folder
        fx.embedder.cancel_after(4, cancel.clone());

        let outcome = fx
            .builder()
            .with_chunk_size(10_000)
            .with_flush_interval(5)
            .run(fx.root.path(), &cancel, &|_, _| {})
            .await;

        assert_eq!(outcome.status, BuildStatus::Cancelled);
        assert_eq!(outcome.stats.folders_completed, 1);
        assert_eq!(outcome.stats.files_embedded, 2);

        let folders = fx.folder_store().load_index().unwrap();
        let files = fx.file_store().load_index().unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(files.len(), 2);
        for store in [fx.folder_store(), fx.file_store()] {
            let raw = fs::read_to_string(store.path()).unwrap();
            let index = store.load_index().unwrap();
            assert_eq!(raw.lines().count(), index.len());
            assert_eq!(index.vectors().count(), index.entries().len());
        }
        let finished = &folders.entries()[0].path;
        for file in files.entries() {
            assert!(file.path.starts_with(finished));
        }
    }

    #[tokio::test]
    async fn test_stores_flushed_during_build() {
        for (interval, files_after_first) in [(2, 2), (3, 0)] {
            let fx = Fixture::new();
            let (folder_store, file_store) = (fx.folder_store(), fx.file_store());
            let seen = Mutex::new(Vec::new());
            let progress = |done: usize, _: usize| {
                if done == 1 {
                    let counts = (Fixture::stored(&folder_store), Fixture::stored(&file_store));
                    seen.lock().unwrap().push(counts);
                }
            };

            fx.builder()
                .with_chunk_size(10_000)
                .with_flush_interval(interval)
                .run(fx.root.path(), &CancelToken::new(), &progress)
                .await;

            assert_eq!(*seen.lock().unwrap(), vec![(1, files_after_first)]);
        }
    }

    #[tokio::test]
    async fn test_model_switch_reembeds_everything() {
        let fx = Fixture::new();
        fx.run(&CancelToken::new()).await;

        let other = Arc::new(CountingEmbedder::other_model("other_384"));
        assert_eq!(other.dimension(), fx.embedder.dimension());
        let outcome = fx
            .builder_using(other.clone())
            .run(fx.root.path(), &CancelToken::new(), &|_, _| {})
            .await;

        assert_eq!(outcome.status, BuildStatus::Done);
        assert_eq!(outcome.stats.folders_cached, 0);
        assert_eq!(outcome.stats.files_cached, 0);
        assert_eq!(outcome.stats.files_embedded, 4);
        assert!(other.calls() > 0);
        for store in [fx.folder_store(), fx.file_store()] {
            let entries = store.read().unwrap();
            assert!(entries.iter().all(|e| e.model.as_deref() == Some("other_384")));
        }

        let again = fx
            .builder_using(other)
            .run(fx.root.path(), &CancelToken::new(), &|_, _| {})
            .await;
        assert_eq!(again.stats.files_cached, 4);
    }

    #[tokio::test]
    async fn test_progress_reported_per_folder() {
        let fx = Fixture::new();
        let seen = Mutex::new(Vec::new());
        let progress = |done: usize, total: usize| seen.lock().unwrap().push((done, total));

        fx.builder()
            .run(fx.root.path(), &CancelToken::new(), &progress)
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn test_deleted_folder_drops_out_after_done() {
        let fx = Fixture::new();
        fx.run(&CancelToken::new()).await;

        fs::remove_dir_all(fx.root.path().join("Taxes")).unwrap();
        fx.run(&CancelToken::new()).await;

        let folders = fx.folder_store().read().unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name(), "Recipes");
        assert!(fx
            .file_store()
            .read()
            .unwrap()
            .iter()
            .all(|e| !e.path.starts_with(fx.root.path().join("Taxes"))));
    }

    #[tokio::test]
    async fn test_unreadable_root_fails_but_flushes() {
        let fx = Fixture::new();
        let builder = fx.builder();

        let outcome = builder
            .run(&fx.root.path().join("missing"), &CancelToken::new(), &|_, _| {})
            .await;

        assert_eq!(outcome.status, BuildStatus::Failed);
        assert!(outcome.message.is_some());
        assert!(fx.folder_store().exists());
    }
}
