use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SEQUENTIAL: &str = r#"{
    "latest_version": "1.2",
    "updates": {
        "1.1": {
            "apk_url": "https://github.com/acme/fleet/blob/main/builds/1.1.apk",
            "changelog": ["Fix boot loop", "Faster sync", "New launcher", "Hidden fourth line"]
        },
        "1.2": { "script_url": "https://example.com/1.2.sh" }
    }
}"#;

/// Write a config pointing at `manifest_url` with all state under `root`.
fn write_config(root: &Path, manifest_url: &str) -> PathBuf {
    let config = format!(
        r#"manifest_url = "{manifest_url}"
state_path = "{state}"

[pipeline]
staging_dir = "{staging}"
"#,
        state = root.join("state.json").display(),
        staging = root.join("staging").display(),
    );
    let path = root.join("config.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn sysupdate(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sysupdate").unwrap();
    cmd.arg("--no-progress")
        .arg("--config")
        .arg(config)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("SYSUPDATE_CONFIG_PATH");
    cmd
}

async fn manifest_server(body: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/system_update.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;
    server
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("sysupdate")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("set-version"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_reports_next_version_and_changelog() -> Result<()> {
    let server = manifest_server(SEQUENTIAL).await;
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), &format!("{}/system_update.json", server.uri()));

    sysupdate(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Update available: v1.1"))
        .stdout(predicate::str::contains("Current version: v1.0"))
        .stdout(predicate::str::contains("• Fix boot loop"))
        .stdout(predicate::str::contains("• New launcher"))
        .stdout(predicate::str::contains("Hidden fourth line").not());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_check_json_output() -> Result<()> {
    let server = manifest_server(SEQUENTIAL).await;
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), &format!("{}/system_update.json", server.uri()));

    let output = sysupdate(&config).args(["check", "--json"]).output()?;
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(report["current_version"], "1.0");
    assert_eq!(report["update"]["target_version"], "1.1");
    assert_eq!(report["update"]["is_newer_than_current"], true);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forced_update_is_shown_as_critical() -> Result<()> {
    let server = manifest_server(r#"{"version": "3.0", "script_url": "s", "forced": true}"#).await;
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), &format!("{}/system_update.json", server.uri()));

    sysupdate(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Critical update available: v3.0 (Installation required)"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_set_version_then_up_to_date() -> Result<()> {
    let server = manifest_server(SEQUENTIAL).await;
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), &format!("{}/system_update.json", server.uri()));

    sysupdate(&config).args(["set-version", "1.2"]).assert().success();

    sysupdate(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("You have the latest version: v1.2"));

    sysupdate(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Current version: v1.2"))
        .stdout(predicate::str::contains("Elevation: su -c"));
    Ok(())
}

#[test]
fn test_set_version_rejects_non_numeric() -> Result<()> {
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), "http://127.0.0.1:9/system_update.json");

    sysupdate(&config)
        .args(["set-version", "beta"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be compared"));

    sysupdate(&config).args(["set-version", "beta", "--force"]).assert().success();
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_apply_dry_run_shows_plan_without_running() -> Result<()> {
    let server = manifest_server(SEQUENTIAL).await;
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), &format!("{}/system_update.json", server.uri()));

    sysupdate(&config)
        .args(["apply", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run"))
        .stdout(predicate::str::contains(
            "https://raw.githubusercontent.com/acme/fleet/main/builds/1.1.apk",
        ))
        .stdout(predicate::str::contains("pm install -r"));

    assert!(!temp.path().join("state.json").exists());
    assert!(!temp.path().join("staging").join("update.apk").exists());
    Ok(())
}

#[test]
fn test_unreachable_manifest_fails_with_suggestion() -> Result<()> {
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), "http://127.0.0.1:9/system_update.json");

    sysupdate(&config)
        .arg("check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Network error"))
        .stderr(predicate::str::contains("suggestion"));
    Ok(())
}

#[test]
fn test_invalid_config_is_reported() -> Result<()> {
    let temp = TempDir::new()?;
    let config = temp.path().join("config.toml");
    std::fs::write(&config, "manifest_url = \"not a url\"\n")?;

    sysupdate(&config)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("manifest_url"));
    Ok(())
}

#[test]
fn test_config_path_from_environment() -> Result<()> {
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), "http://127.0.0.1:9/system_update.json");

    Command::cargo_bin("sysupdate")?
        .arg("status")
        .env("SYSUPDATE_CONFIG_PATH", &config)
        .env("SYSUPDATE_NO_PROGRESS", "1")
        .env("NO_COLOR", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains(config.display().to_string()))
        .stdout(predicate::str::contains("Current version: v1.0"));
    Ok(())
}

#[test]
fn test_init_writes_config_once() -> Result<()> {
    let temp = TempDir::new()?;
    let config = temp.path().join("etc").join("config.toml");

    sysupdate(&config)
        .args(["init", "--manifest-url", "https://example.com/system_update.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));

    let written = std::fs::read_to_string(&config)?;
    assert!(written.contains("manifest_url = \"https://example.com/system_update.json\""));
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(std::fs::metadata(&config)?.permissions().mode() & 0o777, 0o600);
    }

    sysupdate(&config)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    sysupdate(&config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Manifest: https://example.com/system_update.json"));

    sysupdate(&config).args(["init", "--force"]).assert().success();
    Ok(())
}

#[test]
fn test_init_rejects_invalid_manifest_url() -> Result<()> {
    let temp = TempDir::new()?;
    let config = temp.path().join("config.toml");

    sysupdate(&config)
        .args(["init", "--manifest-url", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("manifest_url"));
    assert!(!config.exists());
    Ok(())
}

#[test]
fn test_watch_stops_on_unreadable_state() -> Result<()> {
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), "http://127.0.0.1:9/system_update.json");
    std::fs::write(temp.path().join("state.json"), "{ not json")?;

    sysupdate(&config)
        .args(["watch", "--interval", "1"])
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .code(1);
    Ok(())
}

#[test]
fn test_watch_keeps_running_after_failed_check() -> Result<()> {
    let temp = TempDir::new()?;
    let config = write_config(temp.path(), "http://127.0.0.1:9/system_update.json");

    sysupdate(&config)
        .args(["watch", "--interval", "1"])
        .timeout(std::time::Duration::from_secs(3))
        .assert()
        .interrupted()
        .stderr(predicate::str::contains("Check failed"));
    Ok(())
}
