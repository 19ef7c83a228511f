//! Folder grouping
//!
//! Clusters the indexed folder vectors into `k` groups, names each group,
//! moves the member folders into `<base_dir>/<group name>/` and records
//! every successful move in the transaction log so the whole operation can
//! be reverted by [`undo::UndoEngine`].
//!
//! ## Modules
//! - `kmeans` - Seeded clustering
//! - `naming` - Naming delegate and name normalization
//! - `undo` - Log replay

pub mod kmeans;
pub mod naming;
pub mod undo;

pub use kmeans::KMeans;
pub use naming::{fallback_name, normalize_group_name, LlmNamer, NamingDelegate};
pub use undo::{UndoEngine, UndoReport, UndoStatus};

use crate::error::{Error, Result};
use crate::models::{FingerprintedEntry, MoveRecord};
use crate::store::RecordStore;
use crate::wal::io::move_path;
use crate::wal::{LogManager, TransactionLog};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Outcome of a grouping run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    /// Group name -> member folder names
    pub groups: BTreeMap<String, Vec<String>>,
    /// Moves that were performed and logged
    pub moves: Vec<MoveRecord>,
    /// Moves that failed and were skipped
    pub failed: Vec<String>,
}

pub struct GroupingEngine {
    folder_store: RecordStore,
    undo_log: LogManager,
    base_dir: PathBuf,
    seed: u64,
    max_iterations: usize,
}

impl GroupingEngine {
    pub fn new(folder_store: RecordStore, undo_log: LogManager, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            folder_store,
            undo_log,
            base_dir: base_dir.into(),
            seed: 42,
            max_iterations: 300,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Cluster, name and move the indexed folders
    ///
    /// `k` is checked against the number of indexed folders before anything
    /// on disk is touched. Individual move failures are reported in
    /// [`GroupReport::failed`]; only failing to persist the log is an error.
    pub async fn group(
        &self,
        k: usize,
        namer: Option<&dyn NamingDelegate>,
        progress: &(dyn Fn(usize, usize) + Send + Sync),
    ) -> Result<GroupReport> {
        if !self.folder_store.exists() {
            return Err(Error::InvalidParameters(
                "no folder index found, run a build first".to_string(),
            ));
        }
        let index = self.folder_store.load_index()?;
        let total = index.len();

        if k == 0 || k > total {
            return Err(Error::InvalidParameters(format!(
                "cannot form {} groups from {} indexed folders",
                k, total
            )));
        }

        tracing::info!("[Grouping] Clustering {} folders into {} groups", total, k);
        for done in 1..=total {
            progress(done, total);
            tokio::task::yield_now().await;
        }

        let points: Vec<&[f32]> = index.vectors().collect();
        let labels = KMeans::new(k)
            .with_seed(self.seed)
            .with_max_iterations(self.max_iterations)
            .fit(&points)?;

        let mut clusters: Vec<Vec<&FingerprintedEntry>> = vec![Vec::new(); k];
        for (entry, label) in index.entries().iter().zip(labels) {
            clusters[label].push(entry);
        }

        let folder_paths: HashSet<&Path> = index.entries().iter().map(|e| e.path.as_path()).collect();
        let mut report = GroupReport {
            groups: BTreeMap::new(),
            moves: Vec::new(),
            failed: Vec::new(),
        };

        for (i, members) in clusters.iter().enumerate() {
            let names: Vec<String> = members.iter().map(|e| e.name().to_string()).collect();
            let name = self.group_name(i, &names, namer, &report, &folder_paths).await;
            tracing::info!("[Grouping] Group {}: {:?} -> {}", i, names, name);

            let group_dir = self.base_dir.join(&name);
            let dir_ready = fs::create_dir_all(&group_dir).map_err(|e| {
                tracing::error!("[Grouping] Cannot create {}: {}", group_dir.display(), e);
                e
            });

            for member in members {
                let destination = group_dir.join(member.name());
                if dir_ready.is_err() {
                    report.failed.push(format!(
                        "{}: group directory unavailable",
                        member.path.display()
                    ));
                    continue;
                }

                let (from, to) = (member.path.clone(), destination.clone());
                let moved = tokio::task::spawn_blocking(move || move_path(&from, &to))
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|r| r.map_err(|e| e.to_string()));

                match moved {
                    Ok(()) => {
                        tracing::info!(
                            "[Grouping] Moved {} -> {}",
                            member.path.display(),
                            destination.display()
                        );
                        report.moves.push(MoveRecord {
                            moved_to: destination,
                            moved_from: member.path.clone(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!("[Grouping] Skipping {}: {}", member.path.display(), e);
                        report.failed.push(format!("{}: {}", member.path.display(), e));
                    }
                }
            }

            report.groups.insert(name, names);
        }

        if report.moves.is_empty() {
            tracing::warn!("[Grouping] No folders were moved, transaction log left untouched");
        } else {
            if self.undo_log.exists() {
                tracing::warn!(
                    "[Grouping] Overwriting previous transaction log at {}",
                    self.undo_log.path().display()
                );
            }
            self.undo_log.save(&TransactionLog::new(report.moves.clone()))?;
        }

        Ok(report)
    }

    /// Pick a unique, filesystem-safe name for group `index`
    async fn group_name(
        &self,
        index: usize,
        names: &[String],
        namer: Option<&dyn NamingDelegate>,
        report: &GroupReport,
        folder_paths: &HashSet<&Path>,
    ) -> String {
        let suggested = match namer {
            Some(namer) => namer
                .suggest(names)
                .await
                .and_then(|raw| normalize_group_name(&raw)),
            None => None,
        };

        let mut name = suggested.unwrap_or_else(|| fallback_name(index));
        while report.groups.contains_key(&name)
            || folder_paths.contains(self.base_dir.join(&name).as_path())
        {
            name = format!("{}_{}", name, index);
        }
        name
    }
}
