//! Agent configuration
//!
//! Settings live in a single TOML file, `~/.sysupdate/config.toml` unless
//! `SYSUPDATE_CONFIG_PATH` or `--config` names another. See [`AgentConfig`]
//! for the layout.

mod agent;

pub use agent::{AgentConfig, NetworkConfig, PipelineConfig, WatchConfig};
