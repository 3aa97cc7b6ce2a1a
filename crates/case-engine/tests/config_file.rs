//! Loading TOML configuration from disk and installing the logger

use anyhow::Result;
use serial_test::serial;
use tempfile::TempDir;

use sc_case_engine::config::{EngineConfig, MatchingMode};
use sc_case_engine::logging::setup_logging;
use sc_case_engine::types::{CaseType, NewCase, WorkGroupId};
use sc_case_engine::ServiceCenterEngine;

fn write_config(dir: &TempDir) -> Result<std::path::PathBuf> {
    let database = dir.path().join("center.db");
    let path = dir.path().join("service-center.toml");
    std::fs::write(
        &path,
        format!(
            r#"
            [agent_sessions]
            session_lifetime_secs = 3600
            sweep_interval_secs = 0

            [matching]
            mode = "inline"

            [database]
            url = "sqlite://{}"

            [logging]
            level = "debug"
            "#,
            database.display()
        ),
    )?;
    Ok(path)
}

#[tokio::test]
#[serial]
async fn test_engine_from_config_file() -> Result<()> {
    let dir = TempDir::new()?;
    let config = EngineConfig::load(write_config(&dir)?)?;
    assert_eq!(config.session_lifetime(), chrono::Duration::hours(1));
    assert_eq!(config.inactivity_sweep_interval(), None);
    assert_eq!(config.matching.mode, MatchingMode::Inline);

    let engine = ServiceCenterEngine::builder().with_config(config).build().await?;
    let session = engine
        .sessions()
        .create_and_start_session("alice", "phone-alice", true, None, [WorkGroupId::from("support")])
        .await?;
    let case = engine
        .cases()
        .open_case(NewCase::electronic(CaseType::Callback, "support"))
        .await?;

    let session = engine.sessions().find_active_session_for_agent(&session.agent_id).await?;
    assert_eq!(session.current_case_id(), Some(case.id));
    Ok(())
}

#[test]
#[serial]
fn test_missing_config_file_is_reported() {
    let err = EngineConfig::load("/nonexistent/service-center.toml").unwrap_err();
    assert!(err.to_string().contains("cannot read"));
}

#[test]
#[serial]
fn test_logger_installs_once() -> Result<()> {
    let dir = TempDir::new()?;
    let config = EngineConfig::load(write_config(&dir)?)?;

    setup_logging(&config.logging)?;
    assert!(setup_logging(&config.logging).is_err());
    Ok(())
}
