//! Safe I/O utilities for persisted state
//!
//! Every artifact this crate persists (record stores, transaction log) is
//! replaced as a whole: data goes to a temp file in the target directory,
//! is fsynced, then renamed over the target. A concurrent reader sees the
//! old file or the new one, never a torn write.
//!
//! Also hosts the move primitive used by grouping and undo.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Error type for safe I/O operations
#[derive(Debug, Error)]
pub enum SafeIoError {
    #[error("Cannot determine parent directory for: {0}")]
    Path(String),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to sync {path}: {source}")]
    Sync {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename {from} to {to}: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Source not found: {0}")]
    SourceMissing(String),

    #[error("Destination already exists: {0}")]
    DestinationExists(String),
}

fn write_err(path: &Path, source: std::io::Error) -> SafeIoError {
    SafeIoError::Write {
        path: path.display().to_string(),
        source,
    }
}

/// Replace `path` with `data` atomically
///
/// The parent directory is created if missing. On any failure the temp
/// file is removed and the previous content of `path` is left untouched.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), SafeIoError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| SafeIoError::Path(path.display().to_string()))?;

    if !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
    }

    let temp_name = format!(
        ".{}.tmp.{}",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "store".to_string()),
        uuid::Uuid::new_v4().simple()
    );
    let temp_path = parent.join(&temp_name);

    let write_result = (|| -> Result<(), SafeIoError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| write_err(&temp_path, e))?;

        file.write_all(data).map_err(|e| write_err(&temp_path, e))?;

        file.sync_all().map_err(|e| SafeIoError::Sync {
            path: temp_path.display().to_string(),
            source: e,
        })
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(SafeIoError::Rename {
            from: temp_path.display().to_string(),
            to: path.display().to_string(),
            source: e,
        });
    }

    sync_directory(parent)
}

/// Make a rename inside `path` durable
pub fn sync_directory(path: &Path) -> Result<(), SafeIoError> {
    #[cfg(unix)]
    {
        let dir = File::open(path).map_err(|e| SafeIoError::Sync {
            path: path.display().to_string(),
            source: e,
        })?;
        dir.sync_all().map_err(|e| SafeIoError::Sync {
            path: path.display().to_string(),
            source: e,
        })?;
    }

    // NTFS renames are atomic; directory handles cannot be fsynced
    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

/// Check if a path is a symlink without following it
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_symlink())
        .unwrap_or(false)
}

/// Move a file or directory, refusing to overwrite
///
/// Tries a plain rename first and falls back to copy + remove when the
/// rename fails (typically a cross-device move).
pub fn move_path(source: &Path, destination: &Path) -> Result<(), SafeIoError> {
    if !source.exists() {
        return Err(SafeIoError::SourceMissing(source.display().to_string()));
    }

    if destination.exists() {
        return Err(SafeIoError::DestinationExists(
            destination.display().to_string(),
        ));
    }

    if let Some(parent) = destination.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
        }
    }

    let rename_err = match fs::rename(source, destination) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    tracing::debug!(
        "[SafeIo] rename {} -> {} failed ({}), falling back to copy",
        source.display(),
        destination.display(),
        rename_err
    );

    if source.is_dir() {
        if let Err(e) = copy_dir_all(source, destination) {
            let _ = fs::remove_dir_all(destination);
            return Err(e);
        }
        fs::remove_dir_all(source).map_err(|e| write_err(source, e))
    } else {
        fs::copy(source, destination).map_err(|e| write_err(destination, e))?;
        fs::remove_file(source).map_err(|e| write_err(source, e))
    }
}

/// Copy a directory recursively, skipping symlinks
fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), SafeIoError> {
    fs::create_dir_all(dst).map_err(|e| write_err(dst, e))?;

    for entry in fs::read_dir(src).map_err(|e| write_err(src, e))? {
        let entry = entry.map_err(|e| write_err(src, e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if is_symlink(&src_path) {
            tracing::warn!(path = %src_path.display(), "Skipping symlink during copy");
            continue;
        }

        if src_path.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path).map_err(|e| write_err(&dst_path, e))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.jsonl");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub").join("dir").join("log.json");

        atomic_write(&path, b"[]").unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_move_path_moves_directory() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("Taxes");
        fs::create_dir_all(src.join("2023")).unwrap();
        fs::write(src.join("2023").join("w2.txt"), "wages").unwrap();
        let dst = dir.path().join("Finance").join("Taxes");

        move_path(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(
            fs::read_to_string(dst.join("2023").join("w2.txt")).unwrap(),
            "wages"
        );
    }

    #[test]
    fn test_move_path_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        fs::create_dir(&src).unwrap();
        fs::create_dir(&dst).unwrap();

        let err = move_path(&src, &dst).unwrap_err();
        assert!(matches!(err, SafeIoError::DestinationExists(_)));
        assert!(src.exists());
    }

    #[test]
    fn test_move_path_missing_source() {
        let dir = tempdir().unwrap();
        let err = move_path(&dir.path().join("ghost"), &dir.path().join("x")).unwrap_err();
        assert!(matches!(err, SafeIoError::SourceMissing(_)));
    }

    #[test]
    fn test_is_symlink() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "content").unwrap();

        assert!(!is_symlink(&file));

        #[cfg(unix)]
        {
            let link = dir.path().join("link.txt");
            std::os::unix::fs::symlink(&file, &link).unwrap();
            assert!(is_symlink(&link));
        }
    }
}
