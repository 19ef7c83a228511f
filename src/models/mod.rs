use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One indexed file or folder with the fingerprint it was embedded at
///
/// An entry is either absent from a store or complete: it is only built
/// after the embedding succeeded, and stores are rewritten whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintedEntry {
    /// Absolute path of the file or folder
    pub path: PathBuf,
    /// Content fingerprint the embedding was computed from
    #[serde(rename = "hash")]
    pub fingerprint: String,
    /// The embedding vector
    pub embedding: Vec<f32>,
    /// Model that produced `embedding`; absent in stores written before it
    /// was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Kind-specific fields
    #[serde(flatten)]
    pub aux: EntryAux,
}

/// Auxiliary fields, which also tell folders and files apart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryAux {
    Folder {
        /// Folder name (last path component)
        folder: String,
    },
    File {
        /// File name (last path component)
        file: String,
        /// Top-level folder under the index root that contains the file
        #[serde(rename = "rootFolder")]
        root_folder: PathBuf,
    },
}

impl FingerprintedEntry {
    pub fn folder(path: &Path, fingerprint: String, embedding: Vec<f32>) -> Self {
        Self {
            path: path.to_path_buf(),
            fingerprint,
            embedding,
            model: None,
            aux: EntryAux::Folder {
                folder: file_name_of(path),
            },
        }
    }

    pub fn file(path: &Path, root_folder: &Path, fingerprint: String, embedding: Vec<f32>) -> Self {
        Self {
            path: path.to_path_buf(),
            fingerprint,
            embedding,
            model: None,
            aux: EntryAux::File {
                file: file_name_of(path),
                root_folder: root_folder.to_path_buf(),
            },
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The display name stored with the entry
    pub fn name(&self) -> &str {
        match &self.aux {
            EntryAux::Folder { folder } => folder,
            EntryAux::File { file, .. } => file,
        }
    }
}

/// A single filesystem move performed by grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    /// Where the folder lives after the move
    pub moved_to: PathBuf,
    /// Where the folder lived before the move
    pub moved_from: PathBuf,
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
