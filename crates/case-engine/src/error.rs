//! Error types for the case engine
//!
//! Every failure the core raises is a variant of [`CaseEngineError`]. The
//! domain variants (`DuplicateActiveSession`, `NoActiveSession`,
//! `CannotEndSession`, `CaseNotScheduled`, `NoSuchChannel`) are expected
//! outcomes that callers translate into user-facing responses; the remaining
//! variants wrap infrastructure problems.

use std::fmt;

use thiserror::Error;

use crate::types::{AgentId, AgentSessionId, CaseId};

/// How a telephony channel was looked up when the lookup failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLookup {
    /// Lookup by provider channel id
    Id(String),
    /// Lookup by logical channel reference
    Reference(String),
}

impl fmt::Display for ChannelLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelLookup::Id(id) => write!(f, "id '{}'", id),
            ChannelLookup::Reference(reference) => write!(f, "reference '{}'", reference),
        }
    }
}

#[derive(Error, Debug)]
pub enum CaseEngineError {
    #[error("Agent {agent_id} already has an active session")]
    DuplicateActiveSession { agent_id: AgentId },

    #[error("Agent {agent_id} has no active session")]
    NoActiveSession { agent_id: AgentId },

    #[error("Agent session {agent_session_id} cannot be ended while case {case_id} is assigned to it")]
    CannotEndSession {
        agent_session_id: AgentSessionId,
        case_id: CaseId,
    },

    #[error("Case {case_id} is not scheduled")]
    CaseNotScheduled { case_id: CaseId },

    #[error("No active telephony channel with {0}")]
    NoSuchChannel(ChannelLookup),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Telephony error: {0}")]
    Telephony(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CaseEngineError {
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn telephony<S: Into<String>>(msg: S) -> Self {
        Self::Telephony(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is one of the typed domain outcomes rather than an
    /// infrastructure failure
    pub fn is_domain_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateActiveSession { .. }
                | Self::NoActiveSession { .. }
                | Self::CannotEndSession { .. }
                | Self::CaseNotScheduled { .. }
                | Self::NoSuchChannel(_)
        )
    }
}

impl From<sqlx::Error> for CaseEngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for CaseEngineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(format!("migration failed: {}", err))
    }
}

impl From<serde_json::Error> for CaseEngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, CaseEngineError>;
