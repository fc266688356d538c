//! sysupdate - self-update agent for managed devices
//!
//! The agent consults a remote manifest describing available software
//! versions, picks the single next version the device should move to, fetches
//! its artifacts (a shell script and/or a binary package) and applies them
//! through privileged install steps.
//!
//! # Architecture Overview
//!
//! ```text
//! check:  ManifestFetcher ─► UpdateManifest ─► VersionResolver ─► ResolvedUpdate
//! apply:  UpdatePipeline ─► ArtifactFetcher ─► ElevatedExecutor / PackageInstaller
//!                        └─► PipelineProgress events ─► outcome ─► DeviceState
//! ```
//!
//! - Updates move one version at a time: the smallest manifest version above
//!   the current one, never straight to `latest_version`
//! - The current version changes only after a pipeline run succeeds
//! - A package install counts as successful only when the install command
//!   exits zero *and* prints the success marker
//!
//! # Core Modules
//!
//! - [`manifest`] - manifest download, envelope unwrapping and parsing
//! - [`version`] - next-version resolution with numeric ordering
//! - [`artifact`] - artifact downloads and viewer-URL normalization
//! - [`pipeline`] - the download/stage/elevate/install/execute state machine
//! - [`changelog`] - bounded changelog projection for display
//! - [`exec`] - elevated command execution and package installation seams
//!
//! # Supporting Modules
//!
//! - [`agent`] - check and apply against persisted state
//! - [`cli`] - the `sysupdate` command line
//! - [`config`] - `~/.sysupdate/config.toml`
//! - [`core`] - error types and user-facing error reporting
//! - [`state`] - persisted device state
//! - [`utils`] - atomic file writes and progress spinners
//!
//! # Manifest Formats
//!
//! ```json
//! { "latest_version": "1.2",
//!   "updates": { "1.1": { "apk_url": "https://...", "changelog": ["..."] },
//!                "1.2": { "script_url": "https://...", "forced": true } } }
//! ```
//!
//! ```json
//! { "version": "2.0", "script_url": "https://...", "apk_url": "https://..." }
//! ```
//!
//! Either document may arrive wrapped in a content-API envelope whose
//! `content` field holds the base64-encoded manifest.

pub mod agent;
pub mod artifact;
pub mod changelog;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod exec;
pub mod manifest;
pub mod pipeline;
pub mod state;
pub mod utils;
pub mod version;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
