//! Integration test suite for sysupdate
//!
//! End-to-end tests against a local HTTP server standing in for the manifest
//! and artifact hosts. No test needs a real elevated shell: the pipeline runs
//! against `ScriptedExecutor`, and CLI tests stop short of applying.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **pipeline**: apply runs, stage ordering, failure and cancellation paths
//! - **cli**: the `sysupdate` binary's check, status, dry-run and set-version output

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod pipeline;
