//! Command-line interface for the update agent.
//!
//! # Commands
//!
//! - `check` - fetch the manifest and report the next update
//! - `apply` - check, then download and install the next update
//! - `status` - show the recorded version and configuration
//! - `watch` - check periodically until interrupted
//! - `set-version` - record the current version by hand
//! - `init` - write a config file with the defaults
//!
//! # Global Options
//!
//! - `--verbose` / `-v`: debug logging
//! - `--quiet` / `-q`: errors only
//! - `--config` / `-c`: config file (default `~/.sysupdate/config.toml`)
//! - `--no-progress`: no spinners
//!
//! `RUST_LOG` overrides the log level chosen by the flags.
//!
//! # Example
//!
//! ```bash
//! sysupdate check
//! sysupdate apply --dry-run
//! sysupdate -v watch --auto-apply
//! ```

mod apply;
mod check;
mod init;
mod set_version;
mod status;
mod watch;


use crate::agent::UpdateAgent;
use crate::changelog::ChangelogProjector;
use crate::config::AgentConfig;
use crate::constants::NO_PROGRESS_ENV;
use crate::state::DeviceState;
use crate::version::ResolvedUpdate;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

/// Settings derived from the global flags and handed to every command.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Config file given with `--config`.
    pub config_path: Option<PathBuf>,

    /// Whether spinners are suppressed (`--no-progress` or `SYSUPDATE_NO_PROGRESS`).
    pub no_progress: bool,
}

impl CliConfig {
    /// Load the agent configuration this invocation uses.
    ///
    /// # Errors
    ///
    /// Fails when the config file exists but is invalid.
    pub async fn load_config(&self) -> Result<AgentConfig> {
        AgentConfig::load_with_optional(self.config_path.clone())
            .await
            .context("Failed to load configuration")
    }

    /// Load the configuration and build an agent from it.
    ///
    /// # Errors
    ///
    /// Fails when the configuration is invalid or the agent cannot be built.
    pub async fn load_agent(&self) -> Result<UpdateAgent> {
        let config = self.load_config().await?;
        Ok(UpdateAgent::new(config)?)
    }

    /// Where `init` and `status` should look for the config file.
    ///
    /// # Errors
    ///
    /// Fails when no explicit path is given and the home directory is unknown.
    pub fn config_file(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Ok(AgentConfig::default_path()?),
        }
    }
}

/// Self-update agent for managed devices.
#[derive(Parser)]
#[command(
    name = "sysupdate",
    about = "Check for and apply device updates from a remote manifest",
    version,
    long_about = "sysupdate reads a remote update manifest, picks the next version to install, \
                  and applies it through privileged install steps."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to the config file
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disable progress spinners
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether an update is available
    Check(check::CheckArgs),

    /// Download and install the next update
    Apply(apply::ApplyArgs),

    /// Show the recorded version and configuration
    Status(status::StatusArgs),

    /// Check periodically until interrupted
    Watch(watch::WatchArgs),

    /// Record the device's current version
    SetVersion(set_version::SetVersionArgs),

    /// Write a config file with the default settings
    Init(init::InitArgs),
}

impl Cli {
    /// Default log filter for the given flags; `RUST_LOG` takes precedence.
    #[must_use]
    pub const fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }

    /// Settings shared by every command.
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        CliConfig {
            config_path: self.config.clone(),
            no_progress: self.no_progress || std::env::var(NO_PROGRESS_ENV).is_ok(),
        }
    }

    /// Run the selected command.
    ///
    /// # Errors
    ///
    /// Whatever the command reports; `main` renders it with a suggestion.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        match self.command {
            Commands::Check(args) => check::execute(args, &config).await,
            Commands::Apply(args) => apply::execute(args, &config).await,
            Commands::Status(args) => status::execute(args, &config).await,
            Commands::Watch(args) => watch::execute(args, &config).await,
            Commands::SetVersion(args) => set_version::execute(args, &config).await,
            Commands::Init(args) => init::execute(args, &config).await,
        }
    }
}

/// Print the availability line and changelog for `update`.
pub(crate) fn print_update(state: &DeviceState, update: &ResolvedUpdate) {
    let version = format!("v{}", update.target_version);
    if update.entry.forced {
        println!(
            "{}",
            format!("Critical update available: {version} (Installation required)").red().bold()
        );
    } else {
        println!("{}", format!("Update available: {version}").green());
    }
    println!("  Current version: v{}", state.current_version);

    if !update.is_newer_than_current {
        println!(
            "  {}",
            "Note: this version does not order above the current one".yellow()
        );
    }

    let lines = ChangelogProjector::project(&update.entry);
    if !lines.is_empty() {
        println!("\n{}", "Changes:".bold());
        for line in ChangelogProjector::format(&lines).lines() {
            println!("  {line}");
        }
    }
}

/// Print the up-to-date line.
pub(crate) fn print_up_to_date(state: &DeviceState) {
    println!("{}", format!("You have the latest version: v{}", state.current_version).green());
}
