//! `sysupdate status`: show the recorded version and where things live.
//!
//! The elevation program is only looked up on `PATH` unless `--probe` is
//! given; probing runs `echo test` through it, which may prompt on a terminal.

use super::CliConfig;
use crate::exec::{ElevatedExecutor, ShellElevatedExecutor};
use crate::state::DeviceState;
use crate::utils::Spinner;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Arguments for `sysupdate status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Run a command through the elevation program to confirm it works
    #[arg(long)]
    pub probe: bool,
}

pub async fn execute(args: StatusArgs, config: &CliConfig) -> Result<()> {
    let agent_config = config.load_config().await?;
    let state_path = agent_config.state_path();
    let state = DeviceState::load_or_default(&state_path, &agent_config.default_version).await?;

    println!("{} v{}", "Current version:".bold(), state.current_version);
    match state.updated_at {
        Some(at) => println!("{} {}", "Last updated:".bold(), at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("{} never", "Last updated:".bold()),
    }

    let config_file = config.config_file()?;
    let marker = if config_file.exists() { "" } else { " (not present, using defaults)" };
    println!("{} {}{}", "Config file:".bold(), config_file.display(), marker);
    println!("{} {}", "State file:".bold(), state_path.display());
    println!("{} {}", "Manifest:".bold(), agent_config.manifest_url);
    println!("{} {}", "Staging dir:".bold(), agent_config.pipeline.staging_dir().display());
    println!("{} {}s", "Watch interval:".bold(), agent_config.watch.check_interval);

    let elevation = &agent_config.pipeline.elevation_command;
    let program = elevation.first().map_or("", String::as_str);
    let availability = match which::which(program) {
        Ok(path) => format!("{} ({})", "found".green(), path.display()),
        Err(_) => "not found in PATH".red().to_string(),
    };
    println!("{} {} {}", "Elevation:".bold(), elevation.join(" "), availability);

    if args.probe {
        let executor = ShellElevatedExecutor::from_config(&agent_config.pipeline)?;
        let spinner = Spinner::with_enabled("Probing elevated shell...", !config.no_progress);
        let result = executor.probe().await;
        spinner.finish_and_clear();
        match result {
            Ok(()) => println!("{} {}", "Elevated shell:".bold(), "available".green()),
            Err(e) => println!("{} {} ({e})", "Elevated shell:".bold(), "unavailable".red()),
        }
    }
    Ok(())
}
