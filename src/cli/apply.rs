//! `sysupdate apply`: check, then install the next update.
//!
//! Progress is shown on a spinner whose prefix is the pipeline stage; every
//! line printed by an update script is echoed above it. Ctrl-C asks the
//! pipeline to stop before its next stage, it never interrupts a command
//! that is already running.

use super::{CliConfig, print_up_to_date, print_update};
use crate::agent::UpdateAgent;
use crate::artifact::normalize_url;
use crate::pipeline::{PipelineOutcome, PipelineStage};
use crate::state::DeviceState;
use crate::utils::Spinner;
use crate::version::ResolvedUpdate;
use anyhow::Result;
use clap::Args;
use colored::Colorize;

/// Arguments for `sysupdate apply`.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Show what would be downloaded and run, without doing it
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(args: ApplyArgs, config: &CliConfig) -> Result<()> {
    let agent = config.load_agent().await?;
    let mut state = agent.load_state().await?;

    let spinner = Spinner::with_enabled("Checking for updates...", !config.no_progress);
    let result = agent.check(&state).await;
    spinner.finish_and_clear();

    let Some(update) = result? else {
        print_up_to_date(&state);
        return Ok(());
    };

    print_update(&state, &update);
    println!();

    if args.dry_run {
        print_plan(&agent, &update);
        return Ok(());
    }

    match run_apply(&agent, &mut state, update, config.no_progress).await? {
        PipelineOutcome::Succeeded {
            version,
        } => {
            println!("{}", format!("Updated to v{version}").green().bold());
            Ok(())
        }
        PipelineOutcome::Failed {
            stage,
            error,
        } => {
            eprintln!("{}", format!("Update failed during {stage}").red());
            Err(error.into())
        }
    }
}

/// Apply `update` with spinner output; shared with `watch`.
pub(crate) async fn run_apply(
    agent: &UpdateAgent,
    state: &mut DeviceState,
    update: ResolvedUpdate,
    no_progress: bool,
) -> Result<PipelineOutcome> {
    let spinner = Spinner::with_enabled("Starting update", !no_progress);

    let cancel = agent.pipeline().cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, stopping after the current step...".yellow());
            cancel.cancel();
        }
    });

    let result = agent
        .apply(state, update, |event| {
            if event.stage == PipelineStage::Executing {
                spinner.println(format!("  {}", event.detail.dimmed()));
            }
            spinner.set_prefix(event.stage.to_string());
            spinner.set_message(event.detail.clone());
        })
        .await;

    interrupt.abort();
    spinner.finish_and_clear();
    Ok(result?)
}

fn print_plan(agent: &UpdateAgent, update: &ResolvedUpdate) {
    let pipeline = &agent.config().pipeline;
    println!("{}", "Dry run, nothing will be changed:".bold());

    if !update.entry.has_artifacts() {
        println!("  No artifacts; v{} would be recorded as installed", update.target_version);
        return;
    }

    if let Some(url) = &update.entry.package_url {
        let target = pipeline.install_dir().join(&pipeline.package_file_name);
        println!("  Download package  {}", normalize_url(url));
        println!("  Copy to           {} (mode {})", target.display(), pipeline.install_mode);
        println!("  Install with      {} {}", pipeline.install_command, target.display());
        println!("  Require stdout    {:?}", pipeline.install_success_marker);
    }
    if let Some(url) = &update.entry.script_url {
        let staged = pipeline.staging_dir().join(&pipeline.script_file_name);
        println!("  Download script   {}", normalize_url(url));
        println!("  Run               {} {}", pipeline.script_interpreter, staged.display());
    }
    println!("  Elevate with      {}", pipeline.elevation_command.join(" "));
}
