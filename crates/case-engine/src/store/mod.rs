//! # Storage
//!
//! Repository traits the managers work against, plus the unit of work that
//! combines them. Every manager operation opens one [`StoreTx`], performs all
//! of its reads and writes through it and commits once. Dropping a
//! transaction without committing rolls it back.
//!
//! Two implementations exist:
//!
//! - [`MemoryStore`]: in-process, used by tests and embedders
//! - [`crate::database::SqliteStore`]: sqlx/SQLite with embedded migrations
//!
//! Implementations must enforce "at most one active session per agent" and
//! report a violation as [`CaseEngineError::DuplicateActiveSession`](crate::error::CaseEngineError::DuplicateActiveSession).

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::agent::{AgentSession, AgentSessionLogEntry};
use crate::error::Result;
use crate::queue::{CaseQueueEntry, CaseScheduleEntry};
use crate::telephony::{ChannelEvent, TelephonySession};
use crate::types::{
    AgentId, AgentSessionId, Case, CaseId, LogEntryId, QueueEntryId, ScheduleEntryId, TelephonySessionId,
};

pub use memory::MemoryStore;

#[async_trait]
pub trait CaseRepository: Send {
    async fn insert_case(&mut self, case: &Case) -> Result<()>;

    async fn update_case(&mut self, case: &Case) -> Result<()>;

    async fn find_case(&mut self, case_id: CaseId) -> Result<Option<Case>>;

    async fn find_cases_by_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Vec<Case>>;

    /// Open cases nobody is working on
    async fn find_unfulfilled_cases(&mut self) -> Result<Vec<Case>>;
}

#[async_trait]
pub trait AgentSessionRepository: Send {
    /// Persist a new session together with its current log entry
    async fn insert_agent_session(&mut self, session: &AgentSession) -> Result<()>;

    /// Persist session attributes and the current log entry reference
    async fn update_agent_session(&mut self, session: &AgentSession) -> Result<()>;

    /// Look a session up whether or not it has ended
    async fn find_agent_session(&mut self, agent_session_id: AgentSessionId) -> Result<Option<AgentSession>>;

    async fn find_active_session_by_agent(&mut self, agent_id: &AgentId) -> Result<Option<AgentSession>>;

    /// The active session whose current log entry references the case
    async fn find_active_session_by_case(&mut self, case_id: CaseId) -> Result<Option<AgentSession>>;

    async fn find_active_sessions_by_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Vec<AgentSession>>;

    async fn list_active_sessions(&mut self) -> Result<Vec<AgentSession>>;

    async fn insert_log_entry(&mut self, entry: &AgentSessionLogEntry) -> Result<()>;

    async fn tombstone_log_entry(&mut self, entry_id: LogEntryId, at: DateTime<Utc>) -> Result<()>;

    /// Every entry of a session, tombstoned ones included, oldest first
    async fn list_log_entries(&mut self, agent_session_id: AgentSessionId) -> Result<Vec<AgentSessionLogEntry>>;
}

#[async_trait]
pub trait CaseQueueRepository: Send {
    async fn insert_queue_entry(&mut self, entry: &CaseQueueEntry) -> Result<()>;

    async fn find_active_queue_entry(&mut self, case_id: CaseId) -> Result<Option<CaseQueueEntry>>;

    /// Every entry of a case, tombstoned ones included, oldest first
    async fn find_queue_entries_by_case(&mut self, case_id: CaseId) -> Result<Vec<CaseQueueEntry>>;

    async fn list_active_queue_entries(&mut self) -> Result<Vec<CaseQueueEntry>>;

    async fn tombstone_queue_entry(&mut self, entry_id: QueueEntryId, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait CaseScheduleRepository: Send {
    async fn insert_schedule_entry(&mut self, entry: &CaseScheduleEntry) -> Result<()>;

    async fn update_schedule_entry(&mut self, entry: &CaseScheduleEntry) -> Result<()>;

    async fn find_active_schedule_entry(&mut self, case_id: CaseId) -> Result<Option<CaseScheduleEntry>>;

    async fn list_active_schedule_entries(&mut self) -> Result<Vec<CaseScheduleEntry>>;

    async fn tombstone_schedule_entry(&mut self, entry_id: ScheduleEntryId, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait TelephonySessionRepository: Send {
    /// Persist a new session including any events it already carries
    async fn insert_telephony_session(&mut self, session: &TelephonySession) -> Result<()>;

    /// Persist the forwarded flag and end time
    async fn update_telephony_session(&mut self, session: &TelephonySession) -> Result<()>;

    /// Load a session with its full event log
    async fn find_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Option<TelephonySession>>;

    async fn find_telephony_session_by_provider_reference(
        &mut self,
        provider_reference: &str,
    ) -> Result<Option<TelephonySession>>;

    async fn append_channel_event(
        &mut self,
        telephony_session_id: TelephonySessionId,
        event: &ChannelEvent,
    ) -> Result<()>;
}

/// One unit of work across every repository
#[async_trait]
pub trait StoreTx:
    CaseRepository
    + AgentSessionRepository
    + CaseQueueRepository
    + CaseScheduleRepository
    + TelephonySessionRepository
    + Send
{
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Factory for units of work
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}
