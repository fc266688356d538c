//! Defaults shared across the update agent.
//!
//! Values that appear in more than one module (configuration defaults,
//! staging file names, the package manager's success marker) live here so the
//! config layer and the pipeline never disagree about them.

/// Manifest document fetched by `check` when no `manifest_url` is configured.
///
/// This is a content-API URL, so the response arrives wrapped in a metadata
/// envelope whose `content` field is base64.
pub const DEFAULT_MANIFEST_URL: &str =
    "https://api.github.com/repos/alltechdev/alltech.dev/contents/system_update.json";

/// Version assumed for a device that has never recorded one.
pub const DEFAULT_CURRENT_VERSION: &str = "1.0";

/// Privileged, world-readable directory the package is copied into before install.
pub const DEFAULT_INSTALL_DIR: &str = "/data/local/tmp";

/// File name used for the staged package, both locally and in the install dir.
pub const DEFAULT_PACKAGE_FILE_NAME: &str = "update.apk";

/// File name used for the staged update script.
pub const DEFAULT_SCRIPT_FILE_NAME: &str = "update_script.sh";

/// Command prefix that runs its final argument with elevated privileges.
pub const DEFAULT_ELEVATION_COMMAND: &[&str] = &["su", "-c"];

/// Package install command; the staged package path is appended.
pub const DEFAULT_INSTALL_COMMAND: &str = "pm install -r";

/// Text the package manager prints on stdout when an install succeeded.
///
/// A zero exit status alone is not trusted.
pub const DEFAULT_INSTALL_SUCCESS_MARKER: &str = "Success";

/// Interpreter used to run downloaded update scripts.
pub const DEFAULT_SCRIPT_INTERPRETER: &str = "sh";

/// Octal mode applied to the package after it is copied to the install dir.
pub const DEFAULT_INSTALL_MODE: &str = "644";

/// Timeout for manifest and artifact downloads (60 seconds).
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 60;

/// Interval between checks in `watch` mode (1 hour).
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 3600;

/// Maximum number of changelog lines shown for an update.
pub const CHANGELOG_LIMIT: usize = 3;

/// Name of the cross-process lock file kept in the staging directory.
pub const APPLY_LOCK_FILE_NAME: &str = ".apply.lock";

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "SYSUPDATE_CONFIG_PATH";

/// Environment variable that disables progress spinners when set.
pub const NO_PROGRESS_ENV: &str = "SYSUPDATE_NO_PROGRESS";
