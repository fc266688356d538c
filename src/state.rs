//! Persisted device state.
//!
//! The device's current version lives in a small JSON file
//! (`~/.sysupdate/state.json` by default):
//!
//! ```json
//! { "current_version": "1.1", "updated_at": "2026-03-02T10:15:00Z" }
//! ```
//!
//! The state is an owned value passed explicitly to resolution and changed
//! only after a pipeline run succeeds.

use crate::core::{Result, UpdateError};
use crate::utils::atomic_write;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Version the device runs and when it last changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Version string compared against the manifest.
    pub current_version: String,
    /// When `current_version` was last written by a successful apply or `set-version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceState {
    /// State for a device running `version` that has never been updated.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            current_version: version.into(),
            updated_at: None,
        }
    }

    /// Load the state at `path`, or start from `default_version` if it is missing.
    ///
    /// # Errors
    ///
    /// [`UpdateError::FileSystemError`] when the file exists but cannot be read
    /// or does not hold valid state.
    pub async fn load_or_default(path: &Path, default_version: &str) -> Result<Self> {
        if !path.exists() {
            debug!("No state file at {}, assuming version {}", path.display(), default_version);
            return Ok(Self::new(default_version));
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| UpdateError::file_system("read state", path, &e))?;

        serde_json::from_str(&content).map_err(|e| UpdateError::FileSystemError {
            operation: "parse state".to_string(),
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Write the state to `path` atomically.
    ///
    /// # Errors
    ///
    /// [`UpdateError::FileSystemError`] when the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| UpdateError::Other {
            message: format!("failed to serialize state: {e}"),
        })?;
        atomic_write(path, content.as_bytes()).await?;
        debug!("Saved state {} to {}", self.current_version, path.display());
        Ok(())
    }

    /// Record `version` as installed now.
    pub fn record_version(&mut self, version: impl Into<String>) {
        self.current_version = version.into();
        self.updated_at = Some(Utc::now());
    }
}
