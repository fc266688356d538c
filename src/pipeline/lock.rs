//! Cross-process apply lock.
//!
//! The in-process guard in [`UpdatePipeline`](super::UpdatePipeline) stops a
//! second apply from the same agent. This lock stops a second agent process
//! (a `watch` loop and a manual `apply`, say) from staging into the same
//! directory at the same time. It is held through an OS file lock on
//! `<staging_dir>/.apply.lock` and released when dropped.
//!
//! Acquisition never waits: a held lock is reported as
//! [`UpdateError::AlreadyRunning`].

use crate::constants::APPLY_LOCK_FILE_NAME;
use crate::core::{Result, UpdateError};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Exclusive lock on a staging directory.
#[derive(Debug)]
pub struct ApplyLock {
    file: Arc<File>,
    path: PathBuf,
}

impl ApplyLock {
    /// Try to take the lock for `staging_dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// [`UpdateError::AlreadyRunning`] when another holder exists;
    /// [`UpdateError::FileSystemError`] when the lock file cannot be opened.
    pub async fn try_acquire(staging_dir: &Path) -> Result<Self> {
        crate::utils::ensure_dir(staging_dir).await?;
        let path = staging_dir.join(APPLY_LOCK_FILE_NAME);

        let open_path = path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .map_err(|e| UpdateError::Other {
            message: format!("lock task failed: {e}"),
        })?
        .map_err(|e| UpdateError::file_system("open apply lock", &path, &e))?;
        let file = Arc::new(file);

        let lock_file = Arc::clone(&file);
        let acquired = tokio::task::spawn_blocking(move || lock_file.try_lock_exclusive())
            .await
            .map_err(|e| UpdateError::Other {
                message: format!("lock task failed: {e}"),
            })?;

        match acquired {
            Ok(true) => {
                debug!("Apply lock acquired: {}", path.display());
                Ok(Self {
                    file,
                    path,
                })
            }
            Ok(false) => {
                debug!("Apply lock held elsewhere: {}", path.display());
                Err(UpdateError::AlreadyRunning)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(UpdateError::AlreadyRunning),
            Err(e) => Err(UpdateError::file_system("lock apply lock", &path, &e)),
        }
    }

    /// Location of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ApplyLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file.as_ref());
        debug!("Apply lock released: {}", self.path.display());
    }
}
