//! Terminal spinner
//!
//! A thin wrapper over `indicatif` with the agent's styling. The CLI hides
//! spinners when `SYSUPDATE_NO_PROGRESS` is set or `--no-progress` is given,
//! so scripted runs get clean output.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
        .template("{prefix:.bold} {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Indeterminate progress indicator for a single operation.
#[derive(Clone)]
pub struct Spinner {
    inner: ProgressBar,
}

impl Spinner {
    /// Start a spinner, or a hidden one when `enabled` is false.
    pub fn with_enabled(msg: impl Into<String>, enabled: bool) -> Self {
        let inner = if enabled {
            let bar = ProgressBar::new_spinner();
            bar.set_style(spinner_style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        } else {
            ProgressBar::hidden()
        };
        inner.set_message(msg.into());
        Self {
            inner,
        }
    }

    /// Whether the spinner is drawn at all.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.inner.is_hidden()
    }

    /// Replace the message.
    pub fn set_message(&self, msg: impl Into<String>) {
        self.inner.set_message(msg.into());
    }

    /// Set the bold prefix shown before the spinner, e.g. a stage name.
    pub fn set_prefix(&self, prefix: impl Into<String>) {
        self.inner.set_prefix(prefix.into());
    }

    /// Print a line above the spinner without disturbing it.
    pub fn println(&self, line: impl AsRef<str>) {
        if self.inner.is_hidden() {
            println!("{}", line.as_ref());
        } else {
            self.inner.println(line.as_ref());
        }
    }

    /// Stop and erase the spinner line.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}
