//! Agent configuration file.
//!
//! The agent reads `~/.sysupdate/config.toml` (or the file named by
//! `SYSUPDATE_CONFIG_PATH`). Every field has a default, so a missing file is
//! the same as an empty one:
//!
//! ```toml
//! manifest_url = "https://api.github.com/repos/acme/fleet/contents/system_update.json"
//! state_path = "~/.sysupdate/state.json"
//! default_version = "1.0"
//!
//! [pipeline]
//! staging_dir = "~/.sysupdate/staging"
//! install_dir = "/data/local/tmp"
//! elevation_command = ["su", "-c"]
//! install_command = "pm install -r"
//! install_success_marker = "Success"
//!
//! [network]
//! timeout_secs = 60
//!
//! [watch]
//! check_interval = 3600
//! apply_forced = false
//! ```
//!
//! Paths may start with `~`. Sections equal to their defaults are left out
//! when the file is saved.

use crate::constants::{
    CONFIG_PATH_ENV, DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_CURRENT_VERSION,
    DEFAULT_ELEVATION_COMMAND, DEFAULT_INSTALL_COMMAND, DEFAULT_INSTALL_DIR, DEFAULT_INSTALL_MODE,
    DEFAULT_INSTALL_SUCCESS_MARKER, DEFAULT_MANIFEST_URL, DEFAULT_NETWORK_TIMEOUT_SECS,
    DEFAULT_PACKAGE_FILE_NAME, DEFAULT_SCRIPT_FILE_NAME, DEFAULT_SCRIPT_INTERPRETER,
};
use crate::core::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Three or four octal digits, the only form passed on to `chmod`.
fn is_octal_mode(mode: &str) -> bool {
    (3..=4).contains(&mode.len()) && mode.bytes().all(|b| (b'0'..=b'7').contains(&b))
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Top-level agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Where the update manifest is fetched from.
    pub manifest_url: String,

    /// JSON file holding the device's current version.
    pub state_path: String,

    /// Current version assumed when no state file exists yet.
    pub default_version: String,

    /// Staging and privileged execution settings.
    #[serde(skip_serializing_if = "is_default")]
    pub pipeline: PipelineConfig,

    /// HTTP settings.
    #[serde(skip_serializing_if = "is_default")]
    pub network: NetworkConfig,

    /// Periodic checking in `watch` mode.
    #[serde(skip_serializing_if = "is_default")]
    pub watch: WatchConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            state_path: "~/.sysupdate/state.json".to_string(),
            default_version: DEFAULT_CURRENT_VERSION.to_string(),
            pipeline: PipelineConfig::default(),
            network: NetworkConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

/// How artifacts are staged and which privileged commands apply them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Process-local directory downloads are written to first.
    pub staging_dir: String,
    /// Privileged, world-readable directory the package is copied into.
    pub install_dir: String,
    /// File name of the staged package.
    pub package_file_name: String,
    /// File name of the staged script.
    pub script_file_name: String,
    /// Command prefix that runs its last argument elevated, e.g. `["su", "-c"]`.
    pub elevation_command: Vec<String>,
    /// Package install command; the staged package path is appended.
    pub install_command: String,
    /// Text that must appear on the install command's stdout.
    pub install_success_marker: String,
    /// Interpreter used for update scripts.
    pub script_interpreter: String,
    /// Octal mode set on the package in `install_dir`.
    pub install_mode: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_dir: "~/.sysupdate/staging".to_string(),
            install_dir: DEFAULT_INSTALL_DIR.to_string(),
            package_file_name: DEFAULT_PACKAGE_FILE_NAME.to_string(),
            script_file_name: DEFAULT_SCRIPT_FILE_NAME.to_string(),
            elevation_command: DEFAULT_ELEVATION_COMMAND.iter().map(|s| (*s).to_string()).collect(),
            install_command: DEFAULT_INSTALL_COMMAND.to_string(),
            install_success_marker: DEFAULT_INSTALL_SUCCESS_MARKER.to_string(),
            script_interpreter: DEFAULT_SCRIPT_INTERPRETER.to_string(),
            install_mode: DEFAULT_INSTALL_MODE.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Staging directory with `~` expanded.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        expand(&self.staging_dir)
    }

    /// Install directory with `~` expanded.
    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        expand(&self.install_dir)
    }
}

/// HTTP client settings shared by manifest and artifact downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// `User-Agent` header; content APIs reject requests without one.
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            user_agent: concat!("sysupdate/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl NetworkConfig {
    /// Build the HTTP client used for all downloads.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ConfigError`] when the client cannot be constructed.
    pub fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| UpdateError::ConfigError {
                message: format!("failed to build HTTP client: {e}"),
            })
    }
}

/// Settings for `sysupdate watch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Seconds between checks.
    pub check_interval: u64,
    /// Apply updates marked `forced` without waiting for a manual apply.
    pub apply_forced: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL_SECS,
            apply_forced: false,
        }
    }
}

impl AgentConfig {
    /// Load from `$SYSUPDATE_CONFIG_PATH` or the default location.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read, parsed or validated.
    pub async fn load() -> Result<Self> {
        Self::load_with_optional(None).await
    }

    /// Load from `path` when given, otherwise as [`AgentConfig::load`].
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read, parsed or validated.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate the file at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, parsed or validated.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| UpdateError::file_system("read config", path, &e))?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to `path` with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Fails when the directory or file cannot be written.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| UpdateError::file_system("create config directory", parent, &e))?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| UpdateError::ConfigError {
            message: format!("failed to serialize config: {e}"),
        })?;

        fs::write(path, content)
            .await
            .map_err(|e| UpdateError::file_system("write config", path, &e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms)
                .await
                .map_err(|e| UpdateError::file_system("set config permissions", path, &e))?;
        }

        Ok(())
    }

    /// `$SYSUPDATE_CONFIG_PATH`, or `~/.sysupdate/config.toml`.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ConfigError`] when the home directory is unknown.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }

        dirs::home_dir().map(|home| home.join(".sysupdate").join("config.toml")).ok_or_else(|| {
            UpdateError::ConfigError {
                message: "unable to determine home directory".to_string(),
            }
        })
    }

    /// State file path with `~` expanded.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        expand(&self.state_path)
    }

    /// Reject values the pipeline cannot work with.
    ///
    /// # Errors
    ///
    /// [`UpdateError::ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(UpdateError::ConfigError {
                message: message.to_string(),
            })
        };

        if reqwest::Url::parse(&self.manifest_url).is_err() {
            return invalid("manifest_url is not a valid URL");
        }
        if self.pipeline.elevation_command.is_empty() {
            return invalid("pipeline.elevation_command must name a program");
        }
        if self.pipeline.install_success_marker.trim().is_empty() {
            return invalid("pipeline.install_success_marker must not be empty");
        }
        if !is_octal_mode(&self.pipeline.install_mode) {
            return invalid("pipeline.install_mode must be an octal mode such as 644");
        }
        if self.pipeline.package_file_name.contains('/')
            || self.pipeline.script_file_name.contains('/')
        {
            return invalid("pipeline file names must not contain '/'");
        }
        if self.watch.check_interval == 0 {
            return invalid("watch.check_interval must be at least 1 second");
        }
        Ok(())
    }
}
