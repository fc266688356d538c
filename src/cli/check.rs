//! `sysupdate check`: report the next update without applying it.

use super::{CliConfig, print_up_to_date, print_update};
use crate::state::DeviceState;
use crate::utils::Spinner;
use crate::version::ResolvedUpdate;
use anyhow::Result;
use clap::Args;
use serde::Serialize;

/// Arguments for `sysupdate check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct CheckReport<'a> {
    current_version: &'a str,
    update: Option<&'a ResolvedUpdate>,
}

pub async fn execute(args: CheckArgs, config: &CliConfig) -> Result<()> {
    let agent = config.load_agent().await?;
    let state = agent.load_state().await?;

    let spinner = Spinner::with_enabled("Checking for updates...", !config.no_progress && !args.json);
    let result = agent.check(&state).await;
    spinner.finish_and_clear();
    let update = result?;

    if args.json {
        let report = CheckReport {
            current_version: &state.current_version,
            update: update.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    report(&state, update.as_ref());
    Ok(())
}

fn report(state: &DeviceState, update: Option<&ResolvedUpdate>) {
    match update {
        Some(update) => {
            print_update(state, update);
            println!("\nRun `sysupdate apply` to install it");
        }
        None => print_up_to_date(state),
    }
}
