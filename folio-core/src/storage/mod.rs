//! On-disk storage helpers
//!
//! Finalized artifacts are only ever published atomically: bytes go to a
//! sibling temp file first and are renamed into place, so readers never
//! observe a half-written archive or index.

use crate::error::StorageError;
use std::path::Path;
use tokio::fs;

/// Write `bytes` to `path` atomically via a temp file and rename.
///
/// Parent directories are created as needed. On any failure the destination
/// is left untouched.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::Backend(format!("create {}: {e}", parent.display())))?;
    }

    let tmp = path.with_extension("part");
    fs::write(&tmp, bytes)
        .await
        .map_err(|e| StorageError::Backend(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::Backend(format!("rename into {}: {e}", path.display())))?;
    Ok(())
}

/// Read a file fully, mapping a missing path to [`StorageError::NotFound`]
pub async fn read(path: &Path) -> Result<Vec<u8>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StorageError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(StorageError::Backend(format!("read {}: {e}", path.display()))),
    }
}
