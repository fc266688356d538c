//! Update manifest model and parser.
//!
//! The remote manifest describes which versions can be installed and where
//! their artifacts live. Two document shapes exist in the wild and both are
//! normalized into one [`UpdateManifest`] at parse time:
//!
//! ```json
//! { "latest_version": "1.2",
//!   "updates": { "1.1": { "apk_url": "..." }, "1.2": { "script_url": "...", "forced": true } } }
//! ```
//!
//! ```json
//! { "version": "2.0", "script_url": "...", "changelog": ["..."] }
//! ```
//!
//! The first is the [`ManifestSchema::Sequential`] layout, one entry per key
//! under `updates`. The second is the [`ManifestSchema::Single`] layout: the
//! whole object is one entry. Detection is by key presence only: a document
//! with a `latest_version` key is always treated as sequential.

pub mod fetcher;

use crate::core::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub use fetcher::ManifestFetcher;

/// Which document layout a manifest was parsed from.
///
/// Version resolution depends on it: sequential manifests step through their
/// versions one at a time, single-entry manifests offer their only entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSchema {
    /// `latest_version` + `updates` map.
    Sequential,
    /// A single top-level entry with its own `version` field.
    Single,
}

/// One installable version and its artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateEntry {
    /// Version token, compared numerically during resolution.
    pub version: String,
    /// Shell script to run with elevated privileges.
    pub script_url: Option<String>,
    /// Package to install (`apk_url` in the document).
    pub package_url: Option<String>,
    /// Mandatory/critical update.
    pub forced: bool,
    /// Human readable changes, in manifest order.
    pub changelog: Vec<String>,
}

impl UpdateEntry {
    /// Entry with the given version and no artifacts.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            script_url: None,
            package_url: None,
            forced: false,
            changelog: Vec::new(),
        }
    }

    /// Whether applying this entry has anything to do.
    ///
    /// Entries without artifacts still resolve; applying them is a no-op success.
    #[must_use]
    pub const fn has_artifacts(&self) -> bool {
        self.script_url.is_some() || self.package_url.is_some()
    }
}

/// Entry fields as they appear in the document.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    script_url: Option<String>,
    #[serde(default, rename = "apk_url")]
    package_url: Option<String>,
    #[serde(default)]
    forced: Option<bool>,
    #[serde(default)]
    changelog: Option<Vec<String>>,
}

impl RawEntry {
    fn into_entry(self, version: String) -> UpdateEntry {
        UpdateEntry {
            version,
            script_url: self.script_url,
            package_url: self.package_url,
            forced: self.forced.unwrap_or(false),
            changelog: self.changelog.unwrap_or_default(),
        }
    }
}

/// Parsed remote manifest. Always holds at least one entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateManifest {
    /// Document layout the manifest was read from.
    pub schema: ManifestSchema,
    /// Advertised newest version, sequential manifests only.
    pub latest_version: Option<String>,
    /// Entries keyed by version string.
    pub entries: BTreeMap<String, UpdateEntry>,
}

impl UpdateManifest {
    /// Parse decoded manifest bytes.
    ///
    /// # Errors
    ///
    /// [`UpdateError::FormatError`] when the bytes are not a JSON object, when
    /// a sequential manifest has no `updates` object, when a single-entry
    /// manifest has no `version`, or when no usable entry remains.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| UpdateError::FormatError {
            reason: format!("manifest is not valid JSON: {e}"),
        })?;

        let Value::Object(object) = value else {
            return Err(UpdateError::FormatError {
                reason: "manifest is not a JSON object".to_string(),
            });
        };

        let manifest = if object.contains_key("latest_version") {
            Self::parse_sequential(&object)?
        } else {
            Self::parse_single(object)?
        };

        debug!(
            "Parsed {:?} manifest with {} entr{}",
            manifest.schema,
            manifest.entries.len(),
            if manifest.entries.len() == 1 { "y" } else { "ies" }
        );
        Ok(manifest)
    }

    fn parse_sequential(object: &Map<String, Value>) -> Result<Self> {
        let latest_version = object.get("latest_version").and_then(version_token);

        let updates = object.get("updates").and_then(Value::as_object).ok_or_else(|| {
            UpdateError::FormatError {
                reason: "manifest has `latest_version` but no `updates` object".to_string(),
            }
        })?;

        let mut entries = BTreeMap::new();
        for (version, body) in updates {
            match serde_json::from_value::<RawEntry>(body.clone()) {
                Ok(raw) => {
                    entries.insert(version.clone(), raw.into_entry(version.clone()));
                }
                Err(e) => warn!("Skipping malformed manifest entry '{}': {}", version, e),
            }
        }

        if entries.is_empty() {
            return Err(UpdateError::FormatError {
                reason: "manifest `updates` contains no usable entries".to_string(),
            });
        }

        Ok(Self {
            schema: ManifestSchema::Sequential,
            latest_version,
            entries,
        })
    }

    fn parse_single(object: Map<String, Value>) -> Result<Self> {
        let version = object.get("version").and_then(version_token).ok_or_else(|| {
            UpdateError::FormatError {
                reason: "manifest has neither `latest_version` nor `version`".to_string(),
            }
        })?;

        let raw: RawEntry =
            serde_json::from_value(Value::Object(object)).map_err(|e| UpdateError::FormatError {
                reason: format!("invalid manifest entry: {e}"),
            })?;

        let mut entries = BTreeMap::new();
        entries.insert(version.clone(), raw.into_entry(version));

        Ok(Self {
            schema: ManifestSchema::Single,
            latest_version: None,
            entries,
        })
    }

    /// Look up an entry by its exact version key.
    #[must_use]
    pub fn entry(&self, version: &str) -> Option<&UpdateEntry> {
        self.entries.get(version)
    }
}

/// Read a version field that may be written as a string or a bare number.
fn version_token(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
