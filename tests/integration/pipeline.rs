use crate::common::{agent_config, drain, resolved, scripted_agent, state_path};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use sysupdate::core::UpdateError;
use sysupdate::artifact::ArtifactFetcher;
use sysupdate::exec::ShellPackageInstaller;
use sysupdate::pipeline::{ApplyLock, CancelHandle, PipelineOutcome, PipelineStage, UpdatePipeline};
use sysupdate::state::DeviceState;
use sysupdate::test_utils::{ScriptedExecutor, init_test_logging, output, pipeline_config};
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PACKAGE: &[u8] = b"PK\x03\x04 fake package";
const SCRIPT: &str = "#!/bin/sh\necho step one\necho step two\n";

async fn artifact_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/builds/update.apk"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PACKAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scripts/update.sh"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SCRIPT))
        .mount(&server)
        .await;
    server
}

fn package_url(server: &MockServer) -> Option<String> {
    Some(format!("{}/builds/update.apk", server.uri()))
}

fn script_url(server: &MockServer) -> Option<String> {
    Some(format!("{}/scripts/update.sh", server.uri()))
}

/// Install exits 0 without printing the success marker: the run fails and
/// the recorded version stays put.
#[tokio::test]
async fn test_install_without_success_marker_fails() -> Result<()> {
    init_test_logging(None);
    let server = artifact_server().await;
    let temp = TempDir::new()?;

    let executor = Arc::new(
        ScriptedExecutor::new().respond("pm install", output(0, "Failure [INSTALL_FAILED]\n")),
    );
    let agent = scripted_agent(agent_config(temp.path(), "http://unused"), executor.clone());
    let mut state = agent.load_state().await?;

    let update = resolved("1.1", package_url(&server), script_url(&server));
    let outcome = agent.apply(&mut state, update, |_| {}).await?;

    match outcome {
        PipelineOutcome::Failed {
            stage,
            error:
                UpdateError::InstallError {
                    exit_code,
                    stdout,
                    ..
                },
        } => {
            assert_eq!(stage, PipelineStage::Verifying);
            assert_eq!(exit_code, Some(0));
            assert!(stdout.contains("INSTALL_FAILED"));
        }
        other => panic!("expected install failure, got {other:?}"),
    }

    assert_eq!(state.current_version, "1.0");
    assert!(!state_path(temp.path()).exists());

    // the script step never ran
    let commands = executor.commands();
    assert!(commands.iter().all(|c| !c.contains("update_script.sh")));
    Ok(())
}

#[tokio::test]
async fn test_package_then_script_succeeds_in_order() -> Result<()> {
    let server = artifact_server().await;
    let temp = TempDir::new()?;

    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond("pm install", output(0, "Success\n"))
            .respond("update_script.sh", output(0, "step one\nstep two\n")),
    );
    let agent = scripted_agent(agent_config(temp.path(), "http://unused"), executor.clone());
    let mut state = agent.load_state().await?;

    let mut events = Vec::new();
    let update = resolved("1.1", package_url(&server), script_url(&server));
    let outcome = agent.apply(&mut state, update, |event| events.push(event.clone())).await?;
    assert!(outcome.is_success());

    let stages: Vec<PipelineStage> = events.iter().map(|e| e.stage).collect();
    assert_eq!(
        stages,
        vec![
            PipelineStage::Downloading,
            PipelineStage::Elevating,
            PipelineStage::Staging,
            PipelineStage::Installing,
            PipelineStage::Verifying,
            PipelineStage::Downloading,
            PipelineStage::Executing,
            PipelineStage::Executing,
            PipelineStage::Executing,
        ]
    );
    let script_lines: Vec<&str> = events[7..].iter().map(|e| e.detail.as_str()).collect();
    assert_eq!(script_lines, vec!["step one", "step two"]);

    let staging = temp.path().join("staging");
    let install = temp.path().join("install");
    let commands = executor.commands();
    assert_eq!(
        commands,
        vec![
            format!(
                "cp {} {}",
                staging.join("update.apk").display(),
                install.join("update.apk").display()
            ),
            format!("chmod 644 {}", install.join("update.apk").display()),
            format!("pm install -r {}", install.join("update.apk").display()),
            format!("sh {}", staging.join("update_script.sh").display()),
        ]
    );

    assert_eq!(tokio::fs::read(staging.join("update.apk")).await?, PACKAGE);
    assert_eq!(tokio::fs::read_to_string(staging.join("update_script.sh")).await?, SCRIPT);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = tokio::fs::metadata(staging.join("update_script.sh")).await?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    assert_eq!(state.current_version, "1.1");
    let saved = DeviceState::load_or_default(&state_path(temp.path()), "1.0").await?;
    assert_eq!(saved.current_version, "1.1");
    Ok(())
}

#[tokio::test]
async fn test_failed_install_skips_script_download() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/builds/update.apk"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PACKAGE))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scripts/update.sh"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SCRIPT))
        .expect(0)
        .mount(&server)
        .await;

    let temp = TempDir::new()?;
    let executor = Arc::new(
        ScriptedExecutor::new().respond("pm install", output(1, "Failure [INSTALL_FAILED]\n")),
    );
    let agent = scripted_agent(agent_config(temp.path(), "http://unused"), executor);
    let mut state = DeviceState::new("1.0");

    let update = resolved("1.1", package_url(&server), script_url(&server));
    let outcome = agent.apply(&mut state, update, |_| {}).await?;
    assert!(matches!(outcome, PipelineOutcome::Failed { .. }));
    assert_eq!(state.current_version, "1.0");
    Ok(())
}

#[tokio::test]
async fn test_script_exit_status_decides_outcome() -> Result<()> {
    let server = artifact_server().await;
    let temp = TempDir::new()?;

    let executor =
        Arc::new(ScriptedExecutor::new().respond("update_script.sh", output(2, "partial\n")));
    let agent = scripted_agent(agent_config(temp.path(), "http://unused"), executor);
    let mut state = DeviceState::new("1.0");

    let update = resolved("2.0", None, script_url(&server));
    let outcome = agent.apply(&mut state, update, |_| {}).await?;
    match outcome {
        PipelineOutcome::Failed {
            stage,
            error:
                UpdateError::InstallError {
                    operation,
                    exit_code,
                    ..
                },
        } => {
            assert_eq!(stage, PipelineStage::Executing);
            assert_eq!(operation, "run update script");
            assert_eq!(exit_code, Some(2));
        }
        other => panic!("expected script failure, got {other:?}"),
    }
    assert_eq!(state.current_version, "1.0");
    Ok(())
}

#[tokio::test]
async fn test_copy_failure_stops_before_install() -> Result<()> {
    let server = artifact_server().await;
    let temp = TempDir::new()?;

    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond("cp ", output(1, ""))
            .respond("pm install", output(0, "Success\n")),
    );
    let agent = scripted_agent(agent_config(temp.path(), "http://unused"), executor.clone());
    let mut state = DeviceState::new("1.0");

    let outcome = agent.apply(&mut state, resolved("1.1", package_url(&server), None), |_| {}).await?;
    assert!(matches!(
        outcome,
        PipelineOutcome::Failed {
            stage: PipelineStage::Staging,
            error: UpdateError::InstallError { .. },
        }
    ));
    assert!(executor.commands().iter().all(|c| !c.starts_with("pm install")));
    Ok(())
}

#[tokio::test]
async fn test_missing_elevation_fails_before_staging() -> Result<()> {
    let server = artifact_server().await;
    let temp = TempDir::new()?;

    let executor = Arc::new(ScriptedExecutor::new().failing_probe());
    let agent = scripted_agent(agent_config(temp.path(), "http://unused"), executor.clone());
    let mut state = DeviceState::new("1.0");

    let outcome = agent.apply(&mut state, resolved("1.1", package_url(&server), None), |_| {}).await?;
    assert!(matches!(
        outcome,
        PipelineOutcome::Failed {
            stage: PipelineStage::Elevating,
            error: UpdateError::ElevationUnavailable { .. },
        }
    ));
    assert!(executor.commands().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_download_failure_is_reported_at_download_stage() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = TempDir::new()?;
    let agent = scripted_agent(
        agent_config(temp.path(), "http://unused"),
        Arc::new(ScriptedExecutor::new()),
    );
    let mut state = DeviceState::new("1.0");

    let outcome = agent.apply(&mut state, resolved("1.1", package_url(&server), None), |_| {}).await?;
    assert!(matches!(
        outcome,
        PipelineOutcome::Failed {
            stage: PipelineStage::Downloading,
            error: UpdateError::NetworkError { .. },
        }
    ));
    Ok(())
}

/// Cancelling while `cp` runs lets the staging commands finish and stops
/// before the installer starts.
#[tokio::test]
async fn test_cancel_takes_effect_between_stages() -> Result<()> {
    let server = artifact_server().await;
    let temp = TempDir::new()?;

    let handle = CancelHandle::default();
    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond("pm install", output(0, "Success\n"))
            .cancel_during("cp ", handle.clone()),
    );
    let installer = Arc::new(ShellPackageInstaller::new(executor.clone(), "pm install -r"));
    let pipeline = UpdatePipeline::new(
        ArtifactFetcher::new(reqwest::Client::new()),
        executor.clone(),
        installer,
        pipeline_config(temp.path()),
    )
    .with_cancel_handle(handle);

    let (tx, _rx) = mpsc::unbounded_channel();
    let outcome = pipeline.apply(&resolved("1.1", package_url(&server), None), &tx).await?;

    assert!(matches!(
        outcome,
        PipelineOutcome::Failed {
            stage: PipelineStage::Installing,
            error: UpdateError::Cancelled { .. },
        }
    ));
    let commands = executor.commands();
    assert!(commands.iter().any(|c| c.starts_with("cp ")));
    assert!(commands.iter().any(|c| c.starts_with("chmod ")));
    assert!(commands.iter().all(|c| !c.starts_with("pm install")));
    Ok(())
}

#[tokio::test]
async fn test_second_apply_while_running_is_rejected() -> Result<()> {
    let server = artifact_server().await;
    let temp = TempDir::new()?;

    let executor = Arc::new(
        ScriptedExecutor::new()
            .respond("pm install", output(0, "Success\n"))
            .with_delay(Duration::from_millis(200)),
    );
    let agent = scripted_agent(agent_config(temp.path(), "http://unused"), executor);
    let pipeline = Arc::clone(agent.pipeline());

    let update = resolved("1.1", package_url(&server), None);
    let (mut rx, first) = pipeline.start(update.clone());

    let mut waited = 0;
    while !pipeline.is_running() && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert!(pipeline.is_running());

    let (tx, _second_rx) = mpsc::unbounded_channel();
    let second = pipeline.apply(&update, &tx).await;
    assert!(matches!(second, Err(UpdateError::AlreadyRunning)));

    let outcome = first.await??;
    assert!(outcome.is_success());
    assert!(!drain(&mut rx).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_staging_dir_held_by_another_process_is_already_running() -> Result<()> {
    let temp = TempDir::new()?;
    let agent = scripted_agent(
        agent_config(temp.path(), "http://unused"),
        Arc::new(ScriptedExecutor::new()),
    );

    let _other = ApplyLock::try_acquire(&temp.path().join("staging")).await?;
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = agent.pipeline().apply(&resolved("1.1", None, None), &tx).await;
    assert!(matches!(result, Err(UpdateError::AlreadyRunning)));
    Ok(())
}
