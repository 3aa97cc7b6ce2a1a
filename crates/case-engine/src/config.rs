//! # Engine Configuration
//!
//! All values are read once and injected into the managers at construction.
//!
//! ```toml
//! [agent_sessions]
//! session_lifetime_secs = 28800
//! sweep_interval_secs = 300
//!
//! [matching]
//! mode = "background"
//! debounce_ms = 250
//!
//! [schedule]
//! sweep_interval_secs = 60
//!
//! [database]
//! url = "sqlite://service-center.db"
//! max_connections = 1
//! busy_timeout_secs = 5
//!
//! [telephony]
//! provider = "tracing"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaseEngineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub agent_sessions: AgentSessionConfig,
    pub matching: MatchingConfig,
    pub schedule: ScheduleConfig,
    pub database: DatabaseConfig,
    pub telephony: TelephonyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSessionConfig {
    /// Sessions without a log transition for this long are logged out
    pub session_lifetime_secs: u64,
    /// Interval of the background inactivity sweep, 0 disables it
    pub sweep_interval_secs: u64,
}

impl Default for AgentSessionConfig {
    fn default() -> Self {
        Self {
            session_lifetime_secs: 8 * 60 * 60,
            sweep_interval_secs: 300,
        }
    }
}

/// Where matching passes run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMode {
    /// Right after the triggering event is delivered
    #[default]
    Inline,
    /// In the debounced background runner
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub mode: MatchingMode,
    pub debounce_ms: u64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            mode: MatchingMode::Inline,
            debounce_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Interval of the background due-case sweep, 0 disables it
    pub sweep_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { sweep_interval_secs: 60 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://service-center.db".to_string(),
            max_connections: 1,
            busy_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelephonyProvider {
    /// Log commands without sending them anywhere
    #[default]
    Tracing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    pub provider: TelephonyProvider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub file_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file_info: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| CaseEngineError::configuration(format!("invalid TOML: {}", e)))?;
        config.validate().map_err(CaseEngineError::configuration)?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| CaseEngineError::configuration(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.agent_sessions.session_lifetime_secs == 0 {
            return Err("agent_sessions.session_lifetime_secs must be greater than 0".to_string());
        }
        if self.database.url.trim().is_empty() {
            return Err("database.url must not be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be greater than 0".to_string());
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(format!("logging.level '{}' is not a valid level", self.logging.level));
        }
        Ok(())
    }

    pub fn session_lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.agent_sessions.session_lifetime_secs).unwrap_or(i64::MAX))
    }

    pub fn inactivity_sweep_interval(&self) -> Option<Duration> {
        non_zero_secs(self.agent_sessions.sweep_interval_secs)
    }

    pub fn due_case_sweep_interval(&self) -> Option<Duration> {
        non_zero_secs(self.schedule.sweep_interval_secs)
    }

    pub fn matching_debounce(&self) -> Duration {
        Duration::from_millis(self.matching.debounce_ms)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
