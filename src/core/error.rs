//! Error handling for the update agent
//!
//! This module provides the error taxonomy of the update pipeline and the
//! user-facing error reporting used by the CLI. It follows two rules:
//! 1. **Strongly-typed errors** so callers can tell a failed check from a failed apply
//! 2. **User-friendly messages** with an actionable suggestion for CLI users
//!
//! # Error Categories
//!
//! - **Check stage**: [`UpdateError::NetworkError`], [`UpdateError::FormatError`],
//!   [`UpdateError::VersionError`]
//! - **Apply stage**: [`UpdateError::InstallError`], [`UpdateError::AlreadyRunning`],
//!   [`UpdateError::Cancelled`], [`UpdateError::ElevationUnavailable`]
//! - **Local environment**: [`UpdateError::ConfigError`], [`UpdateError::FileSystemError`]
//!
//! Use [`user_friendly_error`] to turn any error into an [`ErrorContext`] with
//! a suggestion before showing it to the user.
//!
//! # Examples
//!
//! ```rust,no_run
//! use sysupdate::core::{UpdateError, user_friendly_error};
//!
//! let error = UpdateError::FormatError {
//!     reason: "missing `updates` object".to_string(),
//! };
//! let ctx = user_friendly_error(anyhow::Error::from(error));
//! ctx.display(); // colored error with a suggestion
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Every failure the update agent can report.
///
/// Fetch, parse and resolve failures end a `check`; install failures end an
/// `apply`. None of them is retried by the library.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// Transport failure or non-success HTTP status while fetching.
    #[error("Network error: {operation}")]
    NetworkError {
        /// What was being fetched (e.g. "fetch manifest")
        operation: String,
        /// Underlying cause
        reason: String,
    },

    /// The manifest could not be decoded or lacks a required field.
    #[error("Invalid update manifest: {reason}")]
    FormatError {
        /// What is wrong with the document
        reason: String,
    },

    /// The device's current version is not a number.
    #[error("Current version '{version}' cannot be compared: {reason}")]
    VersionError {
        /// The offending version string
        version: String,
        /// Why it was rejected
        reason: String,
    },

    /// An elevated command exited non-zero or lacked the success marker.
    #[error("Install step failed: {operation}")]
    InstallError {
        /// The step that failed (e.g. "install package")
        operation: String,
        /// Exit status, `None` if the process was killed by a signal
        exit_code: Option<i32>,
        /// Captured standard output
        stdout: String,
        /// Captured standard error
        stderr: String,
    },

    /// Another apply is already running in this or another process.
    #[error("An update is already being applied")]
    AlreadyRunning,

    /// The apply was cancelled between two stages.
    #[error("Update cancelled before {stage}")]
    Cancelled {
        /// Stage that was about to start
        stage: String,
    },

    /// The program used for elevation is not installed.
    #[error("Elevation program '{program}' not found in PATH")]
    ElevationUnavailable {
        /// Program name, e.g. `su`
        program: String,
    },

    /// The configuration is unusable.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// A local file operation failed.
    #[error("File system error: {operation} ({path})")]
    FileSystemError {
        /// What was being done
        operation: String,
        /// Path involved
        path: String,
        /// Underlying cause
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Generic error
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

impl UpdateError {
    /// Wrap a reqwest failure for the given operation.
    pub fn network(operation: impl Into<String>, err: &reqwest::Error) -> Self {
        Self::NetworkError {
            operation: operation.into(),
            reason: err.to_string(),
        }
    }

    /// Build a [`UpdateError::FileSystemError`] from an IO error.
    pub fn file_system(
        operation: impl Into<String>,
        path: &std::path::Path,
        err: &std::io::Error,
    ) -> Self {
        Self::FileSystemError {
            operation: operation.into(),
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    /// Whether this error belongs to the check stage (fetch, parse, resolve).
    #[must_use]
    pub const fn is_check_failure(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. } | Self::FormatError { .. } | Self::VersionError { .. }
        )
    }
}

/// User-facing wrapper that pairs an [`UpdateError`] with a suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: UpdateError,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a context with no suggestion or details.
    #[must_use]
    pub const fn new(error: UpdateError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details explaining the error
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error, details and suggestion to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with an actionable suggestion.
///
/// [`UpdateError`] values found anywhere in the `anyhow` chain get tailored
/// suggestions; IO permission errors get an elevation hint; anything else is
/// reported with its full cause chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let update_error = error.chain().find_map(|cause| cause.downcast_ref::<UpdateError>());
    if let Some(update_error) = update_error {
        return create_error_context(update_error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>()
        && io_error.kind() == std::io::ErrorKind::PermissionDenied
    {
        return ErrorContext::new(UpdateError::FileSystemError {
            operation: "file access".to_string(),
            path: "unknown".to_string(),
            reason: io_error.to_string(),
        })
        .with_suggestion("Check ownership of the staging directory and the state file")
        .with_details("The agent itself runs unprivileged; only install steps are elevated");
    }

    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(UpdateError::Other {
        message,
    })
}

fn create_error_context(error: &UpdateError) -> ErrorContext {
    match error {
        UpdateError::NetworkError {
            operation,
            reason,
        } => ErrorContext::new(UpdateError::NetworkError {
            operation: operation.clone(),
            reason: reason.clone(),
        })
        .with_details(reason.clone())
        .with_suggestion("Check network connectivity and the configured manifest_url, then run the check again"),
        UpdateError::FormatError {
            reason,
        } => ErrorContext::new(UpdateError::FormatError {
            reason: reason.clone(),
        })
        .with_suggestion(
            "The manifest needs either `latest_version` + `updates`, or a top-level `version`",
        ),
        UpdateError::VersionError {
            version,
            reason,
        } => ErrorContext::new(UpdateError::VersionError {
            version: version.clone(),
            reason: reason.clone(),
        })
        .with_suggestion("Record a numeric version with `sysupdate set-version <VERSION>`"),
        UpdateError::InstallError {
            operation,
            exit_code,
            stdout,
            stderr,
        } => {
            let mut details = match exit_code {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            };
            if !stdout.trim().is_empty() {
                details.push_str(&format!("\nstdout: {}", stdout.trim()));
            }
            if !stderr.trim().is_empty() {
                details.push_str(&format!("\nstderr: {}", stderr.trim()));
            }
            ErrorContext::new(UpdateError::InstallError {
                operation: operation.clone(),
                exit_code: *exit_code,
                stdout: stdout.clone(),
                stderr: stderr.clone(),
            })
            .with_details(details)
            .with_suggestion("The current version was not changed; fix the cause and apply again")
        }
        UpdateError::AlreadyRunning => ErrorContext::new(UpdateError::AlreadyRunning)
            .with_suggestion("Wait for the running update to finish"),
        UpdateError::Cancelled {
            stage,
        } => ErrorContext::new(UpdateError::Cancelled {
            stage: stage.clone(),
        }),
        UpdateError::ElevationUnavailable {
            program,
        } => ErrorContext::new(UpdateError::ElevationUnavailable {
            program: program.clone(),
        })
        .with_suggestion("Install it or set `pipeline.elevation_command` in the config file"),
        UpdateError::ConfigError {
            message,
        } => ErrorContext::new(UpdateError::ConfigError {
            message: message.clone(),
        })
        .with_suggestion(format!(
            "Check ~/.sysupdate/config.toml or the file named by ${}",
            crate::constants::CONFIG_PATH_ENV
        )),
        UpdateError::FileSystemError {
            operation,
            path,
            reason,
        } => ErrorContext::new(UpdateError::FileSystemError {
            operation: operation.clone(),
            path: path.clone(),
            reason: reason.clone(),
        })
        .with_details(reason.clone()),
        UpdateError::IoError(e) => ErrorContext::new(UpdateError::Other {
            message: format!("IO error: {e}"),
        }),
        UpdateError::TomlError(e) => ErrorContext::new(UpdateError::ConfigError {
            message: e.to_string(),
        })
        .with_suggestion("Check the TOML syntax of the config file"),
        UpdateError::Other {
            message,
        } => ErrorContext::new(UpdateError::Other {
            message: message.clone(),
        }),
    }
}
