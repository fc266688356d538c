//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysupdate::agent::UpdateAgent;
use sysupdate::config::AgentConfig;
use sysupdate::exec::ShellPackageInstaller;
use sysupdate::manifest::UpdateEntry;
use sysupdate::pipeline::PipelineProgress;
use sysupdate::test_utils::{ScriptedExecutor, pipeline_config};
use sysupdate::version::ResolvedUpdate;
use tokio::sync::mpsc;

/// Agent config rooted in `root`, reading its manifest from `manifest_url`.
pub fn agent_config(root: &Path, manifest_url: &str) -> AgentConfig {
    AgentConfig {
        manifest_url: manifest_url.to_string(),
        state_path: state_path(root).display().to_string(),
        pipeline: pipeline_config(root),
        ..AgentConfig::default()
    }
}

pub fn state_path(root: &Path) -> PathBuf {
    root.join("state.json")
}

/// Agent whose elevated commands go to `executor`.
pub fn scripted_agent(config: AgentConfig, executor: Arc<ScriptedExecutor>) -> UpdateAgent {
    let installer = Arc::new(ShellPackageInstaller::new(
        executor.clone(),
        config.pipeline.install_command.clone(),
    ));
    UpdateAgent::with_collaborators(config, reqwest::Client::new(), executor, installer)
}

/// Resolved update for `version` with the given artifact URLs.
pub fn resolved(version: &str, package_url: Option<String>, script_url: Option<String>) -> ResolvedUpdate {
    let mut entry = UpdateEntry::new(version);
    entry.package_url = package_url;
    entry.script_url = script_url;
    ResolvedUpdate {
        target_version: version.to_string(),
        entry,
        is_newer_than_current: true,
    }
}

/// Drain every event left in `rx`.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<PipelineProgress>) -> Vec<PipelineProgress> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
