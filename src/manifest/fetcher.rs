//! Manifest download and envelope unwrapping.
//!
//! Content-hosting APIs return files wrapped in a metadata object:
//!
//! ```json
//! { "name": "system_update.json", "encoding": "base64", "content": "eyJsYXRlc3Rf..." }
//! ```
//!
//! [`ManifestFetcher::fetch`] detects that envelope and yields the decoded
//! payload. Any other body is passed through untouched; checking its shape is
//! left to [`UpdateManifest::parse`](super::UpdateManifest::parse).

use crate::core::{Result, UpdateError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::debug;

/// Fetches raw manifest bytes with a single GET, no retries.
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    client: reqwest::Client,
}

impl ManifestFetcher {
    /// Create a fetcher that uses the given HTTP client.
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
        }
    }

    /// Download the manifest at `url` and unwrap any metadata envelope.
    ///
    /// # Errors
    ///
    /// [`UpdateError::NetworkError`] on transport failure or a non-success
    /// status; [`UpdateError::FormatError`] when an envelope's `content` is
    /// not valid base64.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching manifest from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpdateError::network("fetch manifest", &e))?
            .error_for_status()
            .map_err(|e| UpdateError::network("fetch manifest", &e))?;

        let body =
            response.bytes().await.map_err(|e| UpdateError::network("read manifest body", &e))?;

        unwrap_envelope(body.to_vec())
    }
}

/// Return the payload inside a `content` envelope, or `body` itself.
///
/// # Errors
///
/// [`UpdateError::FormatError`] when `content` exists but is not a base64 string.
pub fn unwrap_envelope(body: Vec<u8>) -> Result<Vec<u8>> {
    let Ok(Value::Object(object)) = serde_json::from_slice::<Value>(&body) else {
        return Ok(body);
    };

    let Some(content) = object.get("content") else {
        return Ok(body);
    };

    let encoded = content.as_str().ok_or_else(|| UpdateError::FormatError {
        reason: "envelope `content` is not a string".to_string(),
    })?;

    // Content APIs wrap the base64 text at fixed line widths
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let decoded = STANDARD.decode(compact).map_err(|e| UpdateError::FormatError {
        reason: format!("envelope `content` is not valid base64: {e}"),
    })?;

    debug!("Unwrapped manifest envelope ({} bytes)", decoded.len());
    Ok(decoded)
}
