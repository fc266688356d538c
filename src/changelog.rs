//! Changelog projection for display.

use crate::constants::CHANGELOG_LIMIT;
use crate::manifest::UpdateEntry;

/// Extracts the short change summary shown next to an available update.
pub struct ChangelogProjector;

impl ChangelogProjector {
    /// First [`CHANGELOG_LIMIT`] changelog lines of `entry`, in manifest order.
    ///
    /// An entry without a changelog yields an empty list.
    #[must_use]
    pub fn project(entry: &UpdateEntry) -> Vec<String> {
        entry.changelog.iter().take(CHANGELOG_LIMIT).cloned().collect()
    }

    /// Render projected lines as a bulleted block, one line per change.
    #[must_use]
    pub fn format(lines: &[String]) -> String {
        lines.iter().map(|line| format!("• {line}")).collect::<Vec<_>>().join("\n")
    }
}
