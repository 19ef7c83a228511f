use crate::classify::Classifier;
use crate::error::{Error, Result};
use crate::events::{ControlEvent, EventBus};
use crate::extract::Extractor;
use crate::models::file_name_of;
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Watcher state
#[derive(Default)]
pub struct WatcherState {
    pub watcher: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
    pub watching_path: Option<PathBuf>,
    worker: Option<JoinHandle<()>>,
}

/// Shared watcher state
pub type WatcherHandle = Arc<Mutex<WatcherState>>;

/// Create a new watcher handle
pub fn create_watcher_handle() -> WatcherHandle {
    Arc::new(Mutex::new(WatcherState::default()))
}

/// Start classifying files created in `path`
///
/// The debouncer thread only filters events and forwards paths; each file
/// is extracted and classified on the blocking pool and reported as a
/// `file_classified` event. Must be called from within a tokio runtime.
pub fn start_watcher(
    handle: &WatcherHandle,
    path: PathBuf,
    classifier: Arc<Classifier>,
    extractor: Arc<dyn Extractor>,
    events: EventBus,
) -> Result<()> {
    let mut state = handle.lock().map_err(|e| Error::Watcher(e.to_string()))?;

    // Stop existing watcher if any
    shutdown(&mut state);

    let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

    // Waits 500ms for file writes to complete
    let mut debouncer = new_debouncer(
        Duration::from_millis(500),
        None,
        move |result: std::result::Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
            Ok(events) => {
                for path in events.iter().flat_map(created_files) {
                    let _ = tx.send(path);
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::warn!("[Watcher] {:?}", error);
                }
            }
        },
    )
    .map_err(|e| Error::Watcher(format!("Failed to create watcher: {}", e)))?;

    debouncer
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| Error::Watcher(format!("Failed to watch {}: {}", path.display(), e)))?;

    let worker = tokio::spawn(async move {
        while let Some(file) = rx.recv().await {
            let classifier = Arc::clone(&classifier);
            let extractor = Arc::clone(&extractor);
            match tokio::task::spawn_blocking(move || classify_file(&file, extractor.as_ref(), &classifier)).await {
                Ok(event) => events.emit(event),
                Err(e) => tracing::error!("[Watcher] Classification task failed: {}", e),
            }
        }
    });

    tracing::info!("[Watcher] Watching {}", path.display());
    state.watcher = Some(debouncer);
    state.watching_path = Some(path);
    state.worker = Some(worker);

    Ok(())
}

/// Stop watching
pub fn stop_watcher(handle: &WatcherHandle) -> Result<()> {
    let mut state = handle.lock().map_err(|e| Error::Watcher(e.to_string()))?;
    shutdown(&mut state);
    Ok(())
}

fn shutdown(state: &mut WatcherState) {
    if let Some(path) = state.watching_path.take() {
        tracing::info!("[Watcher] Stopped watching {}", path.display());
    }
    // Dropping the debouncer closes the channel, which ends the worker
    state.watcher = None;
    state.worker = None;
}

/// Check if watcher is running
pub fn is_watcher_running(handle: &WatcherHandle) -> bool {
    handle
        .lock()
        .map(|state| state.watcher.is_some())
        .unwrap_or(false)
}

/// Get the path being watched
pub fn get_watching_path(handle: &WatcherHandle) -> Option<PathBuf> {
    handle
        .lock()
        .ok()
        .and_then(|state| state.watching_path.clone())
}

/// Newly created files in a debounced event worth classifying
fn created_files(event: &DebouncedEvent) -> Vec<PathBuf> {
    if !matches!(event.kind, EventKind::Create(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|p| is_candidate(p))
        .cloned()
        .collect()
}

/// Regular, visible, finished, non-empty file with an extension
pub fn is_candidate(path: &Path) -> bool {
    let file_name = file_name_of(path);
    if file_name.starts_with('.')
        || file_name.ends_with(".tmp")
        || file_name.ends_with(".crdownload")
        || file_name.ends_with(".part")
        || path.extension().is_none()
    {
        return false;
    }

    // Size 0 means the file is still being written
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Extract and classify one file
pub fn classify_file(path: &Path, extractor: &dyn Extractor, classifier: &Classifier) -> ControlEvent {
    let text = extractor.extract(path).unwrap_or_else(|e| {
        tracing::warn!("[Watcher] extract failed for {}: {}", path.display(), e);
        String::new()
    });
    let category = classifier.classify(&text);
    tracing::info!("[Watcher] {} -> {}", path.display(), category);

    ControlEvent::FileClassified {
        filename: file_name_of(path),
        path: path.display().to_string(),
        category: category.to_string(),
    }
}
