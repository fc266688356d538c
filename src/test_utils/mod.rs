//! Test utilities for the update agent
//!
//! Helpers for unit and integration tests:
//! - [`init_test_logging`] wires `tracing` to the test writer once per process
//! - [`ScriptedExecutor`] stands in for the elevated shell, recording every
//!   command and answering with canned output
//! - [`pipeline_config`] points staging and install directories into a temp dir
//!
//! # Example
//!
//! ```rust,no_run
//! use sysupdate::exec::CommandOutput;
//! use sysupdate::test_utils::{ScriptedExecutor, output};
//!
//! let executor = ScriptedExecutor::new()
//!     .respond("pm install", output(0, "Failure [INSTALL_FAILED]\n"));
//! ```

use crate::config::PipelineConfig;
use crate::core::{Result, UpdateError};
use crate::exec::{CommandOutput, ElevatedExecutor};
use crate::pipeline::CancelHandle;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Mutex, Once};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; with neither, logging stays
/// off. Safe to call from every test.
///
/// ```bash
/// RUST_LOG=exec=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true) // show targets like "exec"
            .with_thread_ids(false)
            .try_init();
    });
}

/// Shorthand for a [`CommandOutput`] with the given exit code and stdout.
#[must_use]
pub fn output(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(exit_code),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Pipeline settings rooted in `root`: `root/staging` and `root/install`.
#[must_use]
pub fn pipeline_config(root: &Path) -> PipelineConfig {
    PipelineConfig {
        staging_dir: root.join("staging").display().to_string(),
        install_dir: root.join("install").display().to_string(),
        ..PipelineConfig::default()
    }
}

/// Canned reply for commands containing `pattern`.
struct Rule {
    pattern: String,
    output: CommandOutput,
}

/// [`ElevatedExecutor`] that never spawns anything.
///
/// Each command is matched against the registered rules in order; the first
/// rule whose pattern is contained in the command supplies the output.
/// Unmatched commands succeed with empty output. Streaming runs replay the
/// canned stdout line by line.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Vec<Rule>,
    probe_fails: bool,
    cancel_on: Option<(String, CancelHandle)>,
    delay: Option<Duration>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    /// Executor where every command succeeds silently.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `output`.
    #[must_use]
    pub fn respond(mut self, pattern: &str, output: CommandOutput) -> Self {
        self.rules.push(Rule {
            pattern: pattern.to_string(),
            output,
        });
        self
    }

    /// Make [`ElevatedExecutor::probe`] report that elevation is unavailable.
    #[must_use]
    pub const fn failing_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    /// Request cancellation while a command containing `pattern` runs.
    #[must_use]
    pub fn cancel_during(mut self, pattern: &str, handle: CancelHandle) -> Self {
        self.cancel_on = Some((pattern.to_string(), handle));
        self
    }

    /// Make every command take `delay` before it answers.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every command run so far, in order.
    ///
    /// # Panics
    ///
    /// If the command log mutex is poisoned.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    async fn answer(&self, command: &str) -> CommandOutput {
        self.commands.lock().unwrap().push(command.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some((pattern, handle)) = &self.cancel_on
            && command.contains(pattern.as_str())
        {
            handle.cancel();
        }

        self.rules
            .iter()
            .find(|rule| command.contains(rule.pattern.as_str()))
            .map_or_else(|| output(0, ""), |rule| rule.output.clone())
    }
}

#[async_trait]
impl ElevatedExecutor for ScriptedExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        Ok(self.answer(command).await)
    }

    async fn run_streaming(
        &self,
        command: &str,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<CommandOutput> {
        let output = self.answer(command).await;
        for line in output.stdout.lines() {
            on_line(line);
        }
        Ok(output)
    }

    async fn probe(&self) -> Result<()> {
        if self.probe_fails {
            Err(UpdateError::ElevationUnavailable {
                program: "su".to_string(),
            })
        } else {
            Ok(())
        }
    }
}
