//! File helpers.

use crate::core::{Result, UpdateError};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Create `path` and its parents if missing.
///
/// # Errors
///
/// [`UpdateError::FileSystemError`] when the directory cannot be created.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| UpdateError::file_system("create directory", path, &e))
}

/// Write `content` to `path` through a temporary sibling and a rename.
///
/// Readers never observe a half-written file.
///
/// # Errors
///
/// [`UpdateError::FileSystemError`] for any failed step.
pub async fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| UpdateError::file_system("create temp file", &temp_path, &e))?;
        file.write_all(content)
            .await
            .map_err(|e| UpdateError::file_system("write temp file", &temp_path, &e))?;
        file.sync_all()
            .await
            .map_err(|e| UpdateError::file_system("sync temp file", &temp_path, &e))?;
    }

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| UpdateError::file_system("rename temp file", path, &e))
}
