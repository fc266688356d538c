//! Privileged command execution.
//!
//! The pipeline never spawns processes itself. It talks to two collaborators:
//!
//! - [`ElevatedExecutor`] runs a shell command string with elevated
//!   privileges and reports exit status plus captured output
//! - [`PackageInstaller`] installs a staged package file
//!
//! [`ShellElevatedExecutor`] implements the first by handing the command to a
//! configured prefix such as `su -c`. [`ShellPackageInstaller`] implements the
//! second on top of any executor. Tests substitute scripted implementations.
//!
//! Elevated commands are never given a timeout and are never killed once
//! started; an interrupted package install leaves the device in an unknown
//! state.

use crate::config::PipelineConfig;
use crate::core::{Result, UpdateError};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Exit status and captured output of one elevated command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Convert into an [`UpdateError::InstallError`] for `operation`.
    #[must_use]
    pub fn into_install_error(self, operation: impl Into<String>) -> UpdateError {
        UpdateError::InstallError {
            operation: operation.into(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}

/// Runs shell commands with elevated privileges.
#[async_trait]
pub trait ElevatedExecutor: Send + Sync {
    /// Run `command` to completion and capture its output.
    async fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Run `command`, calling `on_line` for every stdout line as it arrives.
    ///
    /// The returned output still holds the complete stdout.
    async fn run_streaming(
        &self,
        command: &str,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<CommandOutput>;

    /// Check that elevation works before anything is staged.
    async fn probe(&self) -> Result<()> {
        let output = self.run("echo test").await?;
        if output.success() && output.stdout.contains("test") {
            Ok(())
        } else {
            Err(output.into_install_error("probe elevated shell"))
        }
    }
}

/// Installs a package file from a privileged location.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Install the package at `package`.
    ///
    /// The returned output is judged by the pipeline; implementations only
    /// report what the install command did.
    async fn install(&self, package: &Path) -> Result<CommandOutput>;
}

/// Quote `arg` for a POSIX shell when it contains anything but safe characters.
#[must_use]
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg.chars().all(|c| c.is_ascii_alphanumeric() || "_-./=:+,@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// [`ElevatedExecutor`] that passes the command to an elevation program.
///
/// With the default prefix `["su", "-c"]`, running `chmod 644 /x` spawns
/// `su -c "chmod 644 /x"`.
#[derive(Debug, Clone)]
pub struct ShellElevatedExecutor {
    program: String,
    args: Vec<String>,
}

impl ShellElevatedExecutor {
    /// Build from a command prefix; the first element is the program.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ConfigError`] when `prefix` is empty.
    pub fn new(prefix: &[String]) -> Result<Self> {
        let (program, args) = prefix.split_first().ok_or_else(|| UpdateError::ConfigError {
            message: "elevation command is empty".to_string(),
        })?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Build from the pipeline's `elevation_command`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ConfigError`] when the command is empty.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(&config.elevation_command)
    }

    fn command(&self, command: &str) -> Command {
        tracing::debug!(
            target: "exec",
            "Executing elevated: {} {} {}",
            self.program,
            self.args.join(" "),
            command
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> UpdateError {
        if err.kind() == std::io::ErrorKind::NotFound {
            UpdateError::ElevationUnavailable {
                program: self.program.clone(),
            }
        } else {
            UpdateError::IoError(err)
        }
    }
}

#[async_trait]
impl ElevatedExecutor for ShellElevatedExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let output = self.command(command).output().await.map_err(|e| self.spawn_error(e))?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(target: "exec", "Elevated command exited with {:?}", result.exit_code);
        Ok(result)
    }

    async fn run_streaming(
        &self,
        command: &str,
        on_line: &mut (dyn for<'l> FnMut(&'l str) + Send),
    ) -> Result<CommandOutput> {
        let mut child = self.command(command).spawn().map_err(|e| self.spawn_error(e))?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        // Lines are decoded lossily and a read failure only ends the
        // streaming: the child is always waited for, its exit status decides.
        let mut stdout = String::new();
        if let Some(out) = child.stdout.take() {
            let mut reader = BufReader::new(out);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let decoded = String::from_utf8_lossy(&buf);
                        let line = decoded.trim_end_matches('\n').trim_end_matches('\r');
                        tracing::debug!(target: "exec", "{}", line);
                        on_line(line);
                        stdout.push_str(line);
                        stdout.push('\n');
                    }
                    Err(e) => {
                        tracing::warn!(target: "exec", "Stopped reading script output: {}", e);
                        break;
                    }
                }
            }
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        tracing::debug!(target: "exec", "Elevated command exited with {:?}", status.code());
        Ok(CommandOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }

    async fn probe(&self) -> Result<()> {
        which::which(&self.program).map_err(|_| UpdateError::ElevationUnavailable {
            program: self.program.clone(),
        })?;

        let output = self.run("echo test").await?;
        if output.success() && output.stdout.contains("test") {
            Ok(())
        } else {
            Err(output.into_install_error("probe elevated shell"))
        }
    }
}

/// [`PackageInstaller`] that runs the configured install command elevated.
pub struct ShellPackageInstaller {
    executor: Arc<dyn ElevatedExecutor>,
    install_command: String,
}

impl ShellPackageInstaller {
    /// Build an installer running `install_command <path>` through `executor`.
    pub fn new(executor: Arc<dyn ElevatedExecutor>, install_command: impl Into<String>) -> Self {
        Self {
            executor,
            install_command: install_command.into(),
        }
    }
}

#[async_trait]
impl PackageInstaller for ShellPackageInstaller {
    async fn install(&self, package: &Path) -> Result<CommandOutput> {
        let command =
            format!("{} {}", self.install_command, shell_quote(&package.display().to_string()));
        self.executor.run(&command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/data/local/tmp/update.apk"), "/data/local/tmp/update.apk");
        assert_eq!(shell_quote("my file"), "'my file'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            exit_code: Some(0),
            ..CommandOutput::default()
        };
        assert!(ok.success());
        assert!(!CommandOutput::default().success());
        assert!(
            !CommandOutput {
                exit_code: Some(1),
                ..CommandOutput::default()
            }
            .success()
        );
    }

    #[test]
    fn test_empty_prefix_is_config_error() {
        assert!(matches!(ShellElevatedExecutor::new(&[]), Err(UpdateError::ConfigError { .. })));
    }

    #[cfg(unix)]
    fn sh() -> ShellElevatedExecutor {
        ShellElevatedExecutor::new(&["sh".to_string(), "-c".to_string()]).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output_and_status() {
        let output = sh().run("echo out; echo err >&2; exit 3").await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_streaming_reports_each_line() {
        let mut seen = Vec::new();
        let output = sh()
            .run_streaming("echo one; echo two >&2; echo three", &mut |line: &str| {
                seen.push(line.to_string());
            })
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(seen, vec!["one", "three"]);
        assert_eq!(output.stdout, "one\nthree\n");
        assert_eq!(output.stderr, "two\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_streaming_decodes_invalid_utf8_lossily() {
        let temp = tempfile::TempDir::new().unwrap();
        let marker = temp.path().join("finished");
        let script = format!(
            "printf 'ok\\n\\377\\376\\n'; printf 'h\\303\\251llo\\n'; sleep 0.2; touch {}; exit 0",
            shell_quote(&marker.display().to_string())
        );

        let mut seen = Vec::new();
        let output = sh()
            .run_streaming(&script, &mut |line: &str| seen.push(line.to_string()))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(seen, vec!["ok".to_string(), "\u{FFFD}\u{FFFD}".to_string(), "héllo".to_string()]);
        // the script ran to completion before the call returned
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_streaming_emits_final_line_without_newline() {
        let mut seen = Vec::new();
        let output = sh()
            .run_streaming("printf 'first\\r\\nlast'; exit 4", &mut |line: &str| {
                seen.push(line.to_string());
            })
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(4));
        assert_eq!(seen, vec!["first", "last"]);
        assert_eq!(output.stdout, "first\nlast\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_with_plain_shell() {
        sh().probe().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_is_elevation_unavailable() {
        let executor =
            ShellElevatedExecutor::new(&["sysupdate-no-such-su".to_string(), "-c".to_string()])
                .unwrap();
        assert!(matches!(
            executor.probe().await,
            Err(UpdateError::ElevationUnavailable { .. })
        ));
        assert!(matches!(
            executor.run("true").await,
            Err(UpdateError::ElevationUnavailable { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_package_installer_appends_quoted_path() {
        let installer = ShellPackageInstaller::new(Arc::new(sh()), "echo Success");
        let output = installer.install(Path::new("/tmp/my update.apk")).await.unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "Success /tmp/my update.apk\n");
    }
}
