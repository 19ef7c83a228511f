//! Content fingerprints
//!
//! SHA-256 digests that decide whether a cached embedding is still valid.
//!
//! Files are digested in full. Folders are digested from the first
//! [`FOLDER_SAMPLE_BYTES`] of every contained file, in file-name order, so a
//! change past that prefix in every file of a folder goes unnoticed. That
//! keeps folder checks cheap on large trees; the per-file fingerprints catch
//! the rest.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Bytes read from each file when fingerprinting a folder
pub const FOLDER_SAMPLE_BYTES: usize = 4096;

/// Digest the entire content of a file
///
/// A read error stops the digest where it happened; an unreadable file
/// yields the digest of the bytes read so far (the empty digest if none).
pub fn fingerprint_file(path: &Path) -> String {
    let mut hasher = Sha256::new();

    if let Ok(mut file) = File::open(path) {
        let mut buffer = [0u8; 8192];
        loop {
            match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => hasher.update(&buffer[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("[Fingerprint] read error on {}: {}", path.display(), e);
                    break;
                }
            }
        }
    }

    format!("{:x}", hasher.finalize())
}

/// Digest a folder from the leading bytes of each contained file
///
/// Files are visited recursively in lexicographic order. A file that
/// cannot be read contributes nothing.
pub fn fingerprint_folder(path: &Path) -> String {
    let mut hasher = Sha256::new();

    let walker = WalkDir::new(path)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for entry in walker {
        let mut sample = Vec::with_capacity(FOLDER_SAMPLE_BYTES);
        match File::open(entry.path()) {
            Ok(file) => {
                if file
                    .take(FOLDER_SAMPLE_BYTES as u64)
                    .read_to_end(&mut sample)
                    .is_err()
                {
                    continue;
                }
            }
            Err(_) => continue,
        }
        hasher.update(&sample);
    }

    format!("{:x}", hasher.finalize())
}
