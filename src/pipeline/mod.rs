//! Update application pipeline.
//!
//! [`UpdatePipeline::apply`] turns a [`ResolvedUpdate`] into an installed
//! version. The work runs through a fixed state machine:
//!
//! ```text
//! Idle ──► Downloading ──► Staging ──► Installing ──┬──► Succeeded
//!   │           │                                   │
//!   │           └──────────► Executing ─────────────┤
//!   │                                               │
//!   └──────────── (no artifacts) ───────────────────┘
//!
//! any non-terminal state ──► Failed
//! ```
//!
//! The package step runs first when the entry has a package; the script step
//! follows when the entry has a script. A failed package install aborts the
//! run before the script is downloaded. Nothing is rolled back on failure and
//! staged files are left in the staging directory.
//!
//! Every stage sends a [`PipelineProgress`] event before it starts, and every
//! stdout line of an update script is forwarded as an `Executing` event.
//! Events of one run arrive in order.
//!
//! Only one apply may be in flight per pipeline, and the staging directory is
//! additionally guarded by an [`ApplyLock`] against other processes.
//! Cancellation through a [`CancelHandle`] is honored between stages only; a
//! privileged command that has started always runs to completion.

pub mod lock;

pub use lock::ApplyLock;

use crate::artifact::ArtifactFetcher;
use crate::config::PipelineConfig;
use crate::core::{Result, UpdateError};
use crate::exec::{ElevatedExecutor, PackageInstaller, shell_quote};
use crate::utils::atomic_write;
use crate::version::ResolvedUpdate;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stage named by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineStage {
    /// Fetching an artifact.
    Downloading,
    /// Copying the package to the install location.
    Staging,
    /// Obtaining an elevated shell.
    Elevating,
    /// Running the update script; also used for each line it prints.
    Executing,
    /// Running the package installer.
    Installing,
    /// Checking the installer's result.
    Verifying,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Downloading => "Downloading",
            Self::Staging => "Staging",
            Self::Elevating => "Elevating",
            Self::Executing => "Executing",
            Self::Installing => "Installing",
            Self::Verifying => "Verifying",
        };
        f.write_str(name)
    }
}

/// A transient status event for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineProgress {
    /// Stage the event belongs to.
    pub stage: PipelineStage,
    /// Human readable detail, or one line of script output.
    pub detail: String,
}

impl PipelineProgress {
    /// Create an event.
    pub fn new(stage: PipelineStage, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
        }
    }
}

/// State of a single apply run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing started yet.
    Idle,
    /// Fetching an artifact into the staging directory.
    Downloading,
    /// Moving the package to the install location.
    Staging,
    /// Package installer running or being verified.
    Installing,
    /// Update script running.
    Executing,
    /// Terminal: the target version is installed.
    Succeeded,
    /// Terminal: a stage failed or the run was cancelled.
    Failed,
}

impl PipelineState {
    /// `Succeeded` and `Failed` end a run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (_, Self::Failed) => !self.is_terminal(),
            (Self::Idle, Self::Downloading | Self::Succeeded)
            | (Self::Downloading, Self::Staging | Self::Executing)
            | (Self::Staging, Self::Installing)
            | (Self::Installing, Self::Downloading | Self::Succeeded)
            | (Self::Executing, Self::Succeeded) => true,
            _ => false,
        }
    }
}

/// Terminal result of an apply run.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// The device now runs `version`; the caller should persist it.
    Succeeded {
        /// The applied version
        version: String,
    },
    /// The run stopped; the current version must not change.
    Failed {
        /// Stage that was running or about to start
        stage: PipelineStage,
        /// Why it stopped
        error: UpdateError,
    },
}

impl PipelineOutcome {
    /// Whether the run succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Requests cancellation of a running apply.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Ask the pipeline to stop before its next stage.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Bookkeeping of one run: current state, last stage, event sink.
struct Run<'a> {
    state: PipelineState,
    stage: PipelineStage,
    progress: &'a mpsc::UnboundedSender<PipelineProgress>,
    cancel: &'a CancelHandle,
}

impl<'a> Run<'a> {
    const fn new(
        progress: &'a mpsc::UnboundedSender<PipelineProgress>,
        cancel: &'a CancelHandle,
    ) -> Self {
        Self {
            state: PipelineState::Idle,
            stage: PipelineStage::Downloading,
            progress,
            cancel,
        }
    }

    fn transition(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(UpdateError::Other {
                message: format!("invalid pipeline transition {:?} -> {:?}", self.state, next),
            });
        }
        debug!("Pipeline state {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Start `stage` unless cancellation was requested.
    fn begin(&mut self, stage: PipelineStage, detail: impl Into<String>) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.stage = stage;
            return Err(UpdateError::Cancelled {
                stage: stage.to_string(),
            });
        }
        self.emit(stage, detail);
        Ok(())
    }

    /// Record `stage` and report it without a cancellation check.
    fn emit(&mut self, stage: PipelineStage, detail: impl Into<String>) {
        self.stage = stage;
        // a dropped receiver only means nobody is watching
        let _ = self.progress.send(PipelineProgress::new(stage, detail));
    }

    fn fail(&mut self) {
        self.state = PipelineState::Failed;
    }
}

/// Downloads, stages and applies resolved updates.
pub struct UpdatePipeline {
    fetcher: ArtifactFetcher,
    executor: Arc<dyn ElevatedExecutor>,
    installer: Arc<dyn PackageInstaller>,
    config: PipelineConfig,
    in_flight: Mutex<()>,
    cancel: CancelHandle,
}

impl UpdatePipeline {
    /// Assemble a pipeline from its collaborators.
    pub fn new(
        fetcher: ArtifactFetcher,
        executor: Arc<dyn ElevatedExecutor>,
        installer: Arc<dyn PackageInstaller>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            executor,
            installer,
            config,
            in_flight: Mutex::new(()),
            cancel: CancelHandle::default(),
        }
    }

    /// Use `handle` for cancellation instead of a private one.
    #[must_use]
    pub fn with_cancel_handle(mut self, handle: CancelHandle) -> Self {
        self.cancel = handle;
        self
    }

    /// Handle for cancelling the current or next run between stages.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Whether an apply is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Apply `update`, sending progress events to `progress`.
    ///
    /// Stage failures are reported as [`PipelineOutcome::Failed`].
    ///
    /// # Errors
    ///
    /// [`UpdateError::AlreadyRunning`] when another apply holds this pipeline
    /// or the staging directory lock; nothing is started in that case.
    pub async fn apply(
        &self,
        update: &ResolvedUpdate,
        progress: &mpsc::UnboundedSender<PipelineProgress>,
    ) -> Result<PipelineOutcome> {
        let _guard = self.in_flight.try_lock().map_err(|_| UpdateError::AlreadyRunning)?;

        let staging_dir = self.config.staging_dir();
        let _lock = ApplyLock::try_acquire(&staging_dir).await?;

        info!("Applying update to version {}", update.target_version);
        let mut run = Run::new(progress, &self.cancel);

        match self.execute(&mut run, update, &staging_dir).await {
            Ok(()) => {
                info!("Update to version {} succeeded", update.target_version);
                Ok(PipelineOutcome::Succeeded {
                    version: update.target_version.clone(),
                })
            }
            Err(error) => {
                run.fail();
                warn!("Update failed during {}: {}", run.stage, error);
                Ok(PipelineOutcome::Failed {
                    stage: run.stage,
                    error,
                })
            }
        }
    }

    /// Run [`UpdatePipeline::apply`] on a worker task.
    ///
    /// A cancel request left over from an earlier run is cleared here, before
    /// the worker exists, so a cancel issued after `start` returns is always
    /// honored. Returns the progress stream and the task's handle; the stream
    /// ends when the run does.
    pub fn start(
        self: &Arc<Self>,
        update: ResolvedUpdate,
    ) -> (mpsc::UnboundedReceiver<PipelineProgress>, JoinHandle<Result<PipelineOutcome>>) {
        if !self.is_running() {
            self.cancel.reset();
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move { pipeline.apply(&update, &tx).await });
        (rx, handle)
    }

    async fn execute(
        &self,
        run: &mut Run<'_>,
        update: &ResolvedUpdate,
        staging_dir: &Path,
    ) -> Result<()> {
        let entry = &update.entry;
        if !entry.has_artifacts() {
            info!("Version {} has no artifacts, nothing to apply", update.target_version);
            return run.transition(PipelineState::Succeeded);
        }

        let mut elevated = false;
        if let Some(url) = &entry.package_url {
            self.apply_package(run, url, staging_dir, &mut elevated).await?;
        }
        if let Some(url) = &entry.script_url {
            self.apply_script(run, url, staging_dir, &mut elevated).await?;
        }

        run.transition(PipelineState::Succeeded)
    }

    async fn apply_package(
        &self,
        run: &mut Run<'_>,
        url: &str,
        staging_dir: &Path,
        elevated: &mut bool,
    ) -> Result<()> {
        run.transition(PipelineState::Downloading)?;
        run.begin(PipelineStage::Downloading, format!("package {url}"))?;
        let bytes = self.fetcher.fetch_artifact(url).await?;
        let staged = staging_dir.join(&self.config.package_file_name);
        atomic_write(&staged, &bytes).await?;

        run.transition(PipelineState::Staging)?;
        self.elevate(run, elevated).await?;

        let install_dir = self.config.install_dir();
        let target = install_dir.join(&self.config.package_file_name);
        let target_arg = shell_quote(&target.display().to_string());
        run.begin(PipelineStage::Staging, format!("copying package to {}", install_dir.display()))?;
        self.run_checked(
            "copy package to install directory",
            &format!("cp {} {}", shell_quote(&staged.display().to_string()), target_arg),
        )
        .await?;
        self.run_checked(
            "set package permissions",
            &format!("chmod {} {}", self.config.install_mode, target_arg),
        )
        .await?;

        run.transition(PipelineState::Installing)?;
        run.begin(PipelineStage::Installing, format!("installing {}", target.display()))?;
        let output = self.installer.install(&target).await?;

        // the install already ran, so verification is not a cancellation point
        run.emit(PipelineStage::Verifying, "checking install result");
        let marker = &self.config.install_success_marker;
        if output.success() && output.stdout.contains(marker.as_str()) {
            info!("Package installed");
            Ok(())
        } else {
            warn!(
                "Package install failed (exit {:?}, success marker {}): {}",
                output.exit_code,
                if output.stdout.contains(marker.as_str()) { "present" } else { "missing" },
                output.stdout.trim()
            );
            Err(output.into_install_error("install package"))
        }
    }

    async fn apply_script(
        &self,
        run: &mut Run<'_>,
        url: &str,
        staging_dir: &Path,
        elevated: &mut bool,
    ) -> Result<()> {
        run.transition(PipelineState::Downloading)?;
        run.begin(PipelineStage::Downloading, format!("script {url}"))?;
        let bytes = self.fetcher.fetch_artifact(url).await?;
        let staged = staging_dir.join(&self.config.script_file_name);
        atomic_write(&staged, &bytes).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|e| UpdateError::file_system("mark script executable", &staged, &e))?;
        }

        self.elevate(run, elevated).await?;

        run.transition(PipelineState::Executing)?;
        run.begin(PipelineStage::Executing, format!("running {}", staged.display()))?;

        let command = format!(
            "{} {}",
            self.config.script_interpreter,
            shell_quote(&staged.display().to_string())
        );
        let events = run.progress.clone();
        let output = self
            .executor
            .run_streaming(&command, &mut |line: &str| {
                let _ = events.send(PipelineProgress::new(PipelineStage::Executing, line));
            })
            .await?;

        if output.success() {
            info!("Update script finished");
            Ok(())
        } else {
            warn!("Update script exited with {:?}", output.exit_code);
            Err(output.into_install_error("run update script"))
        }
    }

    /// Probe the elevated shell once per run.
    async fn elevate(&self, run: &mut Run<'_>, elevated: &mut bool) -> Result<()> {
        if *elevated {
            return Ok(());
        }
        run.begin(PipelineStage::Elevating, "requesting elevated shell")?;
        self.executor.probe().await?;
        *elevated = true;
        Ok(())
    }

    async fn run_checked(&self, operation: &str, command: &str) -> Result<()> {
        let output = self.executor.run(command).await?;
        if output.success() {
            Ok(())
        } else {
            Err(output.into_install_error(operation))
        }
    }
}
