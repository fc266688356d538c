//! Artifact downloads.
//!
//! Manifests often link artifacts through a source host's file *viewer*
//! (`https://github.com/owner/repo/blob/main/update.apk`), which serves an
//! HTML page rather than the file. [`normalize_url`] rewrites those links to
//! the raw-content host before anything is downloaded; fetching a viewer URL
//! directly would stage an HTML page as the package.

use crate::core::{Result, UpdateError};
use reqwest::Url;
use tracing::{debug, info};

/// Host that serves the HTML file viewer.
const VIEWER_HOST: &str = "github.com";

/// Host that serves raw file content for the same paths.
const RAW_HOST: &str = "raw.githubusercontent.com";

/// Path segment that marks a viewer URL (`/owner/repo/blob/<ref>/<path>`).
const VIEWER_SEGMENT: &str = "blob";

/// Rewrite a source-hosting viewer URL to its raw-content equivalent.
///
/// `https://github.com/o/r/blob/main/a.sh` becomes
/// `https://raw.githubusercontent.com/o/r/main/a.sh`. URLs on other hosts,
/// without a `blob` segment, or already raw are returned unchanged, so
/// normalizing twice equals normalizing once.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };

    if parsed.host_str() != Some(VIEWER_HOST) {
        return url.to_string();
    }

    let Some(segments) = parsed.path_segments() else {
        return url.to_string();
    };
    let segments: Vec<String> = segments.map(str::to_string).collect();

    // owner / repo / blob / ref / path...
    if segments.len() < 4 || segments[2] != VIEWER_SEGMENT {
        return url.to_string();
    }

    let raw_path = segments
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 2)
        .map(|(_, s)| s.as_str())
        .collect::<Vec<_>>()
        .join("/");

    if parsed.set_host(Some(RAW_HOST)).is_err() {
        return url.to_string();
    }
    parsed.set_path(&raw_path);

    let raw = parsed.to_string();
    debug!("Converted viewer URL to raw URL: {} -> {}", url, raw);
    raw
}

/// Downloads update artifacts after normalizing their URLs.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
}

impl ArtifactFetcher {
    /// Create a fetcher that uses the given HTTP client.
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
        }
    }

    /// Download the artifact at `url`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::NetworkError`] on transport failure or a non-success status.
    pub async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>> {
        let url = normalize_url(url);
        info!("Downloading artifact from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UpdateError::network(format!("download {url}"), &e))?
            .error_for_status()
            .map_err(|e| UpdateError::network(format!("download {url}"), &e))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| UpdateError::network(format!("read {url}"), &e))?;

        debug!("Downloaded {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }
}
