//! Small helpers shared by the agent, the pipeline and the CLI.
//!
//! - [`fs`] - atomic writes for the state file and staged artifacts
//! - [`progress`] - terminal spinner for `check` and `apply`

pub mod fs;
pub mod progress;

pub use fs::{atomic_write, ensure_dir};
pub use progress::Spinner;
