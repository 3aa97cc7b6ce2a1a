//! `sc`: batch entry points of the service center case engine
//!
//! Each batch command opens the configured database, runs one pass and
//! exits. `run` keeps the engine with its background tasks alive until
//! Ctrl-C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use sc_case_engine::config::{EngineConfig, MatchingMode};
use sc_case_engine::database::SqliteStore;
use sc_case_engine::logging::setup_logging;
use sc_case_engine::ServiceCenterEngine;

#[derive(Parser, Debug)]
#[command(name = "sc", version, about = "Service center case engine tools", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SC_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `database.url` from the configuration
    #[arg(long, env = "SC_DATABASE_URL")]
    database_url: Option<String>,

    /// Overrides `logging.level` from the configuration
    #[arg(long)]
    log_level: Option<String>,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or upgrade the database schema
    Migrate,
    /// End agent sessions that have been inactive for longer than the session lifetime
    LogoutInactiveSessions,
    /// Run one matching pass over the case queue
    ProcessCaseQueue,
    /// Move scheduled cases whose due time has passed onto the queue
    QueueDueCases,
    /// Queue open cases that are neither assigned, queued nor scheduled
    RequeueOrphanedCases,
    /// Run the engine with its background tasks until Ctrl-C
    Run,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn print_report<T: Serialize + std::fmt::Debug>(json: bool, report: &T) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{:#?}", report);
    }
    Ok(())
}

async fn build_engine(mut config: EngineConfig) -> Result<ServiceCenterEngine> {
    // One-shot commands deliver follow-up events before exiting
    config.matching.mode = MatchingMode::Inline;
    let engine = ServiceCenterEngine::builder()
        .with_config(config)
        .build()
        .await
        .context("building service center engine")?;
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    setup_logging(&config.logging)?;

    match cli.command {
        Command::Migrate => {
            let store = SqliteStore::connect(&config.database)
                .await
                .with_context(|| format!("opening {}", config.database.url))?;
            store.close().await;
            info!("✅ Database schema is up to date");
        }
        Command::LogoutInactiveSessions => {
            let engine = build_engine(config).await?;
            let report = engine.logout_inactive_sessions().await?;
            print_report(cli.json, &report)?;
            if !report.is_clean() {
                anyhow::bail!("{} session(s) could not be logged out", report.failed.len());
            }
        }
        Command::ProcessCaseQueue => {
            let engine = build_engine(config).await?;
            let report = engine.process_case_queue().await?;
            print_report(cli.json, &report)?;
        }
        Command::QueueDueCases => {
            let engine = build_engine(config).await?;
            let report = engine.queue_due_cases().await?;
            print_report(cli.json, &report)?;
        }
        Command::RequeueOrphanedCases => {
            let engine = build_engine(config).await?;
            let requeued = engine.requeue_orphaned_cases().await?;
            print_report(cli.json, &requeued)?;
        }
        Command::Run => {
            let mut engine = ServiceCenterEngine::builder()
                .with_config(config)
                .build()
                .await
                .context("building service center engine")?;
            engine.start().await?;

            info!("📞 Service center engine is running, press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

            engine.stop().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["sc", "--database-url", "sqlite::memory:", "process-case-queue"]).unwrap();
        assert!(matches!(cli.command, Command::ProcessCaseQueue));
        assert_eq!(cli.database_url.as_deref(), Some("sqlite::memory:"));

        let cli = Cli::try_parse_from(["sc", "--json", "logout-inactive-sessions"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Command::LogoutInactiveSessions));

        assert!(Cli::try_parse_from(["sc", "shred-everything"]).is_err());
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let cli = Cli::try_parse_from(["sc", "--log-level", "debug", "--database-url", "sqlite://other.db", "migrate"])
            .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.database.url, "sqlite://other.db");
    }
}
