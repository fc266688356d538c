//! Next-version resolution.
//!
//! Versions in update manifests are plain numeric tokens (`"1.0"`, `"1.1"`,
//! `"2"`) and are ordered by their floating-point value. This is deliberately
//! not semantic versioning: `"1.10"` reads as `1.1` and therefore sorts
//! *below* `"1.9"`, and three-component versions such as `"1.2.3"` do not
//! parse at all and are skipped. Deployed manifests were written against this
//! ordering, so it is preserved as-is.
//!
//! Resolution always moves one step: from a sequential manifest the
//! smallest version above the current one is chosen, never the manifest's
//! overall `latest_version`. Callers repeat the check to walk further.

use crate::core::{Result, UpdateError};
use crate::manifest::{ManifestSchema, UpdateEntry, UpdateManifest};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::{debug, warn};

/// The single next update to install.
///
/// Computed fresh by every check and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedUpdate {
    /// Version the device will run after a successful apply.
    pub target_version: String,
    /// Artifacts and metadata of that version.
    pub entry: UpdateEntry,
    /// Whether the target orders above the current version.
    ///
    /// Always true for sequential manifests. A single-entry manifest offers
    /// its entry whenever the version differs, which may be a downgrade.
    pub is_newer_than_current: bool,
}

/// Parse a version token the way manifests have always been compared.
///
/// Returns `None` for anything that is not a finite decimal number.
#[must_use]
pub fn parse_numeric(version: &str) -> Option<f64> {
    version.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Order two parsed candidates: by value, then by the raw string when equal.
fn compare_candidates(a: &(f64, &str), b: &(f64, &str)) -> Ordering {
    a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then_with(|| a.1.cmp(b.1))
}

/// Computes the next version a device should move to.
pub struct VersionResolver;

impl VersionResolver {
    /// Resolve the next update for a device running `current_version`.
    ///
    /// Returns `Ok(None)` when the device is up to date.
    ///
    /// # Errors
    ///
    /// [`UpdateError::VersionError`] when a sequential manifest is resolved
    /// against a `current_version` that is not numeric. Entries with
    /// non-numeric versions are skipped with a warning.
    pub fn resolve(
        manifest: &UpdateManifest,
        current_version: &str,
    ) -> Result<Option<ResolvedUpdate>> {
        match manifest.schema {
            ManifestSchema::Sequential => Self::resolve_sequential(manifest, current_version),
            ManifestSchema::Single => Ok(Self::resolve_single(manifest, current_version)),
        }
    }

    fn resolve_sequential(
        manifest: &UpdateManifest,
        current_version: &str,
    ) -> Result<Option<ResolvedUpdate>> {
        let current = parse_numeric(current_version).ok_or_else(|| UpdateError::VersionError {
            version: current_version.to_string(),
            reason: "not a number".to_string(),
        })?;

        let mut candidates: Vec<(f64, &str)> = manifest
            .entries
            .keys()
            .filter_map(|version| match parse_numeric(version) {
                Some(value) => Some((value, version.as_str())),
                None => {
                    warn!("Skipping non-numeric manifest version '{}'", version);
                    None
                }
            })
            .collect();
        candidates.sort_by(compare_candidates);

        let Some(&(_, next)) = candidates.iter().find(|(value, _)| *value > current) else {
            debug!("No manifest version above {}", current_version);
            return Ok(None);
        };

        if let Some(latest) = &manifest.latest_version
            && latest != next
        {
            debug!("Stepping to {} on the way to {}", next, latest);
        }

        Ok(manifest.entry(next).map(|entry| ResolvedUpdate {
            target_version: next.to_string(),
            entry: entry.clone(),
            is_newer_than_current: true,
        }))
    }

    fn resolve_single(manifest: &UpdateManifest, current_version: &str) -> Option<ResolvedUpdate> {
        let entry = manifest.entries.values().next()?;
        if entry.version == current_version {
            return None;
        }

        let is_newer = match (parse_numeric(&entry.version), parse_numeric(current_version)) {
            (Some(target), Some(current)) => target > current,
            _ => false,
        };
        if !is_newer {
            warn!(
                "Manifest version {} does not order above current {}; offering it anyway",
                entry.version, current_version
            );
        }

        Some(ResolvedUpdate {
            target_version: entry.version.clone(),
            entry: entry.clone(),
            is_newer_than_current: is_newer,
        })
    }
}
