//! The update agent: check and apply against the persisted device state.
//!
//! ```text
//! check:  ManifestFetcher ─► UpdateManifest::parse ─► VersionResolver ─► Option<ResolvedUpdate>
//! apply:  UpdatePipeline (worker task) ─► progress events ─► outcome ─► DeviceState (success only)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use sysupdate::agent::UpdateAgent;
//! use sysupdate::config::AgentConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let agent = UpdateAgent::new(AgentConfig::load().await?)?;
//! let mut state = agent.load_state().await?;
//!
//! if let Some(update) = agent.check(&state).await? {
//!     let outcome = agent.apply(&mut state, update, |event| println!("{}: {}", event.stage, event.detail)).await?;
//!     println!("success: {}", outcome.is_success());
//! }
//! # Ok(())
//! # }
//! ```

use crate::artifact::ArtifactFetcher;
use crate::config::AgentConfig;
use crate::core::{Result, UpdateError};
use crate::exec::{ElevatedExecutor, PackageInstaller, ShellElevatedExecutor, ShellPackageInstaller};
use crate::manifest::{ManifestFetcher, UpdateManifest};
use crate::pipeline::{PipelineOutcome, PipelineProgress, UpdatePipeline};
use crate::state::DeviceState;
use crate::version::{ResolvedUpdate, VersionResolver};
use std::sync::Arc;
use tracing::{debug, info};

/// Owns the configured collaborators for checking and applying updates.
pub struct UpdateAgent {
    config: AgentConfig,
    fetcher: ManifestFetcher,
    pipeline: Arc<UpdatePipeline>,
}

impl UpdateAgent {
    /// Build an agent that elevates through the configured shell prefix.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ConfigError`] when the HTTP client or the elevation
    /// command cannot be set up.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let client = config.network.client()?;
        let executor: Arc<dyn ElevatedExecutor> =
            Arc::new(ShellElevatedExecutor::from_config(&config.pipeline)?);
        let installer: Arc<dyn PackageInstaller> = Arc::new(ShellPackageInstaller::new(
            Arc::clone(&executor),
            config.pipeline.install_command.clone(),
        ));
        Ok(Self::with_collaborators(config, client, executor, installer))
    }

    /// Build an agent around explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        config: AgentConfig,
        client: reqwest::Client,
        executor: Arc<dyn ElevatedExecutor>,
        installer: Arc<dyn PackageInstaller>,
    ) -> Self {
        let pipeline = UpdatePipeline::new(
            ArtifactFetcher::new(client.clone()),
            executor,
            installer,
            config.pipeline.clone(),
        );
        Self {
            fetcher: ManifestFetcher::new(client),
            pipeline: Arc::new(pipeline),
            config,
        }
    }

    /// The configuration the agent was built with.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The pipeline used by [`UpdateAgent::apply`].
    #[must_use]
    pub const fn pipeline(&self) -> &Arc<UpdatePipeline> {
        &self.pipeline
    }

    /// Load the device state from the configured path.
    ///
    /// # Errors
    ///
    /// Fails when an existing state file cannot be read.
    pub async fn load_state(&self) -> Result<DeviceState> {
        DeviceState::load_or_default(&self.config.state_path(), &self.config.default_version).await
    }

    /// Fetch and parse the configured manifest.
    ///
    /// # Errors
    ///
    /// [`UpdateError::NetworkError`] or [`UpdateError::FormatError`].
    pub async fn fetch_manifest(&self) -> Result<UpdateManifest> {
        let bytes = self.fetcher.fetch(&self.config.manifest_url).await?;
        UpdateManifest::parse(&bytes)
    }

    /// Determine the next update for `state`, if any.
    ///
    /// # Errors
    ///
    /// Any fetch, parse or resolve failure; nothing is retried.
    pub async fn check(&self, state: &DeviceState) -> Result<Option<ResolvedUpdate>> {
        let manifest = self.fetch_manifest().await?;
        let resolved = VersionResolver::resolve(&manifest, &state.current_version)?;

        match &resolved {
            Some(update) => info!(
                "Update available: {} -> {}",
                state.current_version, update.target_version
            ),
            None => info!("Version {} is up to date", state.current_version),
        }
        Ok(resolved)
    }

    /// Apply `update` on a worker task and persist the new version on success.
    ///
    /// `on_progress` sees every pipeline event in order. The state is left
    /// untouched unless the outcome is [`PipelineOutcome::Succeeded`].
    ///
    /// # Errors
    ///
    /// [`UpdateError::AlreadyRunning`] when an apply is in flight, or a
    /// [`UpdateError::FileSystemError`] when the new state cannot be saved.
    pub async fn apply<F>(
        &self,
        state: &mut DeviceState,
        update: ResolvedUpdate,
        mut on_progress: F,
    ) -> Result<PipelineOutcome>
    where
        F: FnMut(&PipelineProgress),
    {
        let (mut events, handle) = self.pipeline.start(update);
        while let Some(event) = events.recv().await {
            debug!("{}: {}", event.stage, event.detail);
            on_progress(&event);
        }

        let outcome = handle.await.map_err(|e| UpdateError::Other {
            message: format!("update worker failed: {e}"),
        })??;

        if let PipelineOutcome::Succeeded {
            version,
        } = &outcome
        {
            state.record_version(version.clone());
            state.save(&self.config.state_path()).await?;
        }
        Ok(outcome)
    }

    /// Whether `watch` should apply `update` without being asked.
    ///
    /// `apply_all` comes from `watch --auto-apply`; forced updates are applied
    /// when `watch.apply_forced` is set.
    #[must_use]
    pub const fn should_auto_apply(&self, update: &ResolvedUpdate, apply_all: bool) -> bool {
        apply_all || (update.entry.forced && self.config.watch.apply_forced)
    }
}
