//! `sysupdate watch`: check on a fixed interval until Ctrl-C.
//!
//! A failed fetch, parse or resolve is reported and retried on the next
//! tick; any other error ends the loop. Updates are only applied
//! automatically with `--auto-apply`, or when they are marked forced and
//! `watch.apply_forced` is set in the config.

use super::apply::run_apply;
use super::{CliConfig, print_update};
use crate::core::UpdateError;
use crate::pipeline::PipelineOutcome;
use anyhow::Result;
use chrono::Local;
use clap::Args;
use colored::Colorize;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Arguments for `sysupdate watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Seconds between checks (overrides `watch.check_interval`)
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: Option<u64>,

    /// Apply every update as soon as it is found
    #[arg(long)]
    pub auto_apply: bool,
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

pub async fn execute(args: WatchArgs, config: &CliConfig) -> Result<()> {
    let agent = config.load_agent().await?;
    let mut state = agent.load_state().await?;

    let interval = args.interval.unwrap_or(agent.config().watch.check_interval);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    println!(
        "{}",
        format!("Watching for updates every {interval}s (Ctrl-C to stop)").cyan()
    );

    let mut last_offered: Option<String> = None;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped");
                return Ok(());
            }
        }

        debug!("Checking for updates from v{}", state.current_version);
        let update = match agent.check(&state).await {
            Ok(Some(update)) => update,
            Ok(None) => {
                last_offered = None;
                continue;
            }
            Err(e) if e.is_check_failure() => {
                warn!("Update check failed: {}", e);
                eprintln!("[{}] {} {}", timestamp(), "Check failed:".yellow(), e);
                continue;
            }
            // local problems do not fix themselves between ticks
            Err(e) => return Err(e.into()),
        };

        let apply = agent.should_auto_apply(&update, args.auto_apply);
        if !apply && last_offered.as_deref() == Some(update.target_version.as_str()) {
            continue;
        }

        println!("[{}]", timestamp());
        print_update(&state, &update);

        if !apply {
            println!("Run `sysupdate apply` to install it\n");
            last_offered = Some(update.target_version.clone());
            continue;
        }

        match run_apply(&agent, &mut state, update, config.no_progress).await {
            Ok(PipelineOutcome::Succeeded {
                version,
            }) => {
                println!("{}\n", format!("Updated to v{version}").green().bold());
                if agent.pipeline().cancel_handle().is_cancelled() {
                    println!("Stopped");
                    return Ok(());
                }
                last_offered = None;
                // the next version may already be waiting
                ticker.reset_immediately();
            }
            Ok(PipelineOutcome::Failed {
                error: UpdateError::Cancelled {
                    ..
                },
                ..
            }) => {
                println!("Stopped");
                return Ok(());
            }
            Ok(PipelineOutcome::Failed {
                stage,
                error,
            }) => {
                eprintln!("{} {}\n", format!("Update failed during {stage}:").red(), error);
            }
            Err(e) => {
                eprintln!("{} {}\n", "Update could not start:".red(), e);
            }
        }
    }
}
