//! `sysupdate set-version`: record the current version by hand.
//!
//! Used when a device is provisioned with a known build, or to recover from
//! a state file holding a non-numeric version.

use super::CliConfig;
use crate::core::UpdateError;
use crate::state::DeviceState;
use crate::version::parse_numeric;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Arguments for `sysupdate set-version`.
#[derive(Args, Debug)]
pub struct SetVersionArgs {
    /// Version the device runs now
    #[arg(value_name = "VERSION")]
    pub version: String,

    /// Accept a version that is not a number
    #[arg(long)]
    pub force: bool,
}

pub async fn execute(args: SetVersionArgs, config: &CliConfig) -> Result<()> {
    let version = args.version.trim().to_string();
    if parse_numeric(&version).is_none() && !args.force {
        return Err(UpdateError::VersionError {
            version,
            reason: "not a number (use --force to record it anyway)".to_string(),
        }
        .into());
    }

    let agent_config = config.load_config().await?;
    let path = agent_config.state_path();
    let mut state = DeviceState::load_or_default(&path, &agent_config.default_version).await?;

    let previous = std::mem::take(&mut state.current_version);
    state.record_version(version);
    state.save(&path).await?;

    println!(
        "{}",
        format!("Current version set: v{} -> v{}", previous, state.current_version).green()
    );
    Ok(())
}
