//! `sysupdate init`: write a config file holding the defaults.

use super::CliConfig;
use crate::config::AgentConfig;
use anyhow::{Result, anyhow};
use clap::Args;
use colored::Colorize;

/// Arguments for `sysupdate init`.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Manifest URL to record instead of the built-in default
    #[arg(long, value_name = "URL")]
    pub manifest_url: Option<String>,

    /// Overwrite an existing config file
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(args: InitArgs, config: &CliConfig) -> Result<()> {
    let path = config.config_file()?;
    if path.exists() && !args.force {
        return Err(anyhow!(
            "Config file already exists at {}. Use --force to overwrite",
            path.display()
        ));
    }

    let mut agent_config = AgentConfig::default();
    if let Some(url) = args.manifest_url {
        agent_config.manifest_url = url;
    }
    agent_config.validate()?;
    agent_config.save_to(&path).await?;

    println!("{} {}", "Wrote".green(), path.display());
    Ok(())
}
