//! Durable file storage helpers.
//!
//! Every durable artifact in the engine (cache manifest, mutation journal,
//! favorites table, road-segment table) is a JSON document written through
//! [`atomic_write`]: the bytes land in a temporary sibling file which is then
//! renamed over the destination. A crash mid-write leaves the previous
//! version intact, never a torn file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from local persistence.
///
/// Storage failures are fatal to the single operation that hit them and are
/// logged by the caller; they never corrupt entries already on disk.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted document failed to parse.
    #[error("corrupt document at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A document failed to serialize.
    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Suffix used for in-flight temporary files.
const TMP_SUFFIX: &str = ".tmp";

/// Atomically replace the file at `path` with `bytes`.
///
/// Creates parent directories as needed. The write goes to a temporary
/// sibling first and is renamed into place, so readers observe either the
/// old content or the new content, never a partial write.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = tmp_path(path);
    fs::write(&tmp, bytes)?;

    if let Err(e) = fs::rename(&tmp, path) {
        // Leave no stray temp file behind on failure
        let _ = fs::remove_file(&tmp);
        return Err(StorageError::Io(e));
    }

    Ok(())
}

/// Load a JSON document, returning `None` if the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::Io(e)),
    };

    let value = serde_json::from_slice(&bytes).map_err(|source| StorageError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(Some(value))
}

/// Serialize `value` as JSON and atomically write it to `path`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(StorageError::Encode)?;
    atomic_write(path, &bytes)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}
