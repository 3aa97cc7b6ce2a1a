//! In-process store
//!
//! A unit of work takes the store-wide lock, works on a private copy of the
//! state and swaps it in on commit. Units of work are therefore fully
//! serialized, and dropping one leaves the shared state untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    AgentSessionRepository, CaseQueueRepository, CaseRepository, CaseScheduleRepository, Store, StoreTx,
    TelephonySessionRepository,
};
use crate::agent::{AgentSession, AgentSessionLogEntry};
use crate::error::{CaseEngineError, Result};
use crate::queue::{CaseQueueEntry, CaseScheduleEntry};
use crate::telephony::{ChannelEvent, TelephonySession};
use crate::types::{
    AgentId, AgentSessionId, Case, CaseId, CaseStatus, LogEntryId, QueueEntryId, ScheduleEntryId,
    TelephonySessionId,
};

#[derive(Debug, Default, Clone)]
struct MemoryState {
    cases: HashMap<CaseId, Case>,
    agent_sessions: HashMap<AgentSessionId, AgentSession>,
    log_entries: HashMap<LogEntryId, AgentSessionLogEntry>,
    queue_entries: HashMap<QueueEntryId, CaseQueueEntry>,
    schedule_entries: HashMap<ScheduleEntryId, CaseScheduleEntry>,
    telephony_sessions: HashMap<TelephonySessionId, TelephonySession>,
}

impl MemoryState {
    /// Session with its log entry as currently stored
    fn hydrate(&self, session: &AgentSession) -> AgentSession {
        let mut session = session.clone();
        if let Some(entry) = self.log_entries.get(&session.log_entry.id) {
            session.log_entry = entry.clone();
        }
        session
    }

    fn active_sessions(&self) -> Vec<AgentSession> {
        let mut sessions: Vec<AgentSession> = self
            .agent_sessions
            .values()
            .filter(|session| session.is_active())
            .map(|session| self.hydrate(session))
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    fn ensure_single_active_session(&self, session: &AgentSession) -> Result<()> {
        if !session.is_active() {
            return Ok(());
        }
        let duplicate = self
            .agent_sessions
            .values()
            .any(|other| other.id != session.id && other.is_active() && other.agent_id == session.agent_id);
        if duplicate {
            return Err(CaseEngineError::DuplicateActiveSession {
                agent_id: session.agent_id.clone(),
            });
        }
        Ok(())
    }
}

/// Store keeping everything in process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

fn oldest_first<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(|item| key(item));
    items
}

#[async_trait]
impl CaseRepository for MemoryTx {
    async fn insert_case(&mut self, case: &Case) -> Result<()> {
        if self.working.cases.contains_key(&case.id) {
            return Err(CaseEngineError::conflict(format!("Case {} already exists", case.id)));
        }
        self.working.cases.insert(case.id, case.clone());
        Ok(())
    }

    async fn update_case(&mut self, case: &Case) -> Result<()> {
        match self.working.cases.get_mut(&case.id) {
            Some(stored) => {
                *stored = case.clone();
                Ok(())
            }
            None => Err(CaseEngineError::not_found(format!("Case {}", case.id))),
        }
    }

    async fn find_case(&mut self, case_id: CaseId) -> Result<Option<Case>> {
        Ok(self.working.cases.get(&case_id).cloned())
    }

    async fn find_cases_by_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Vec<Case>> {
        let cases = self
            .working
            .cases
            .values()
            .filter(|case| case.telephony_session_id == Some(telephony_session_id))
            .cloned()
            .collect();
        Ok(oldest_first(cases, |case: &Case| (case.started_at, case.id)))
    }

    async fn find_unfulfilled_cases(&mut self) -> Result<Vec<Case>> {
        let cases = self
            .working
            .cases
            .values()
            .filter(|case| case.status == CaseStatus::Open)
            .cloned()
            .collect();
        Ok(oldest_first(cases, |case: &Case| (case.started_at, case.id)))
    }
}

#[async_trait]
impl AgentSessionRepository for MemoryTx {
    async fn insert_agent_session(&mut self, session: &AgentSession) -> Result<()> {
        self.working.ensure_single_active_session(session)?;
        self.working
            .log_entries
            .insert(session.log_entry.id, session.log_entry.clone());
        self.working.agent_sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_agent_session(&mut self, session: &AgentSession) -> Result<()> {
        if !self.working.agent_sessions.contains_key(&session.id) {
            return Err(CaseEngineError::not_found(format!("Agent session {}", session.id)));
        }
        self.working.ensure_single_active_session(session)?;
        self.working.agent_sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_agent_session(&mut self, agent_session_id: AgentSessionId) -> Result<Option<AgentSession>> {
        Ok(self
            .working
            .agent_sessions
            .get(&agent_session_id)
            .map(|session| self.working.hydrate(session)))
    }

    async fn find_active_session_by_agent(&mut self, agent_id: &AgentId) -> Result<Option<AgentSession>> {
        Ok(self
            .working
            .active_sessions()
            .into_iter()
            .find(|session| &session.agent_id == agent_id))
    }

    async fn find_active_session_by_case(&mut self, case_id: CaseId) -> Result<Option<AgentSession>> {
        Ok(self
            .working
            .active_sessions()
            .into_iter()
            .find(|session| session.current_case_id() == Some(case_id)))
    }

    async fn find_active_sessions_by_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Vec<AgentSession>> {
        Ok(self
            .working
            .active_sessions()
            .into_iter()
            .filter(|session| session.current_telephony_session_id() == Some(telephony_session_id))
            .collect())
    }

    async fn list_active_sessions(&mut self) -> Result<Vec<AgentSession>> {
        Ok(self.working.active_sessions())
    }

    async fn insert_log_entry(&mut self, entry: &AgentSessionLogEntry) -> Result<()> {
        let current_exists = self
            .working
            .log_entries
            .values()
            .any(|other| other.agent_session_id == entry.agent_session_id && other.is_current());
        if entry.is_current() && current_exists {
            return Err(CaseEngineError::conflict(format!(
                "Agent session {} already has a current log entry",
                entry.agent_session_id
            )));
        }
        self.working.log_entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn tombstone_log_entry(&mut self, entry_id: LogEntryId, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.working.log_entries.get_mut(&entry_id) {
            entry.deleted_at.get_or_insert(at);
        }
        Ok(())
    }

    async fn list_log_entries(&mut self, agent_session_id: AgentSessionId) -> Result<Vec<AgentSessionLogEntry>> {
        let entries = self
            .working
            .log_entries
            .values()
            .filter(|entry| entry.agent_session_id == agent_session_id)
            .cloned()
            .collect();
        Ok(oldest_first(entries, |entry: &AgentSessionLogEntry| {
            (entry.created_at, entry.deleted_at.is_none(), entry.id)
        }))
    }
}

#[async_trait]
impl CaseQueueRepository for MemoryTx {
    async fn insert_queue_entry(&mut self, entry: &CaseQueueEntry) -> Result<()> {
        let duplicate = self
            .working
            .queue_entries
            .values()
            .any(|other| other.case_id == entry.case_id && other.is_active());
        if duplicate {
            return Err(CaseEngineError::conflict(format!("Case {} is already queued", entry.case_id)));
        }
        self.working.queue_entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn find_active_queue_entry(&mut self, case_id: CaseId) -> Result<Option<CaseQueueEntry>> {
        Ok(self
            .working
            .queue_entries
            .values()
            .find(|entry| entry.case_id == case_id && entry.is_active())
            .cloned())
    }

    async fn find_queue_entries_by_case(&mut self, case_id: CaseId) -> Result<Vec<CaseQueueEntry>> {
        let entries = self
            .working
            .queue_entries
            .values()
            .filter(|entry| entry.case_id == case_id)
            .cloned()
            .collect();
        Ok(oldest_first(entries, |entry: &CaseQueueEntry| (entry.created_at, entry.id)))
    }

    async fn list_active_queue_entries(&mut self) -> Result<Vec<CaseQueueEntry>> {
        let entries = self
            .working
            .queue_entries
            .values()
            .filter(|entry| entry.is_active())
            .cloned()
            .collect();
        Ok(oldest_first(entries, |entry: &CaseQueueEntry| (entry.created_at, entry.id)))
    }

    async fn tombstone_queue_entry(&mut self, entry_id: QueueEntryId, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.working.queue_entries.get_mut(&entry_id) {
            entry.deleted_at.get_or_insert(at);
        }
        Ok(())
    }
}

#[async_trait]
impl CaseScheduleRepository for MemoryTx {
    async fn insert_schedule_entry(&mut self, entry: &CaseScheduleEntry) -> Result<()> {
        let duplicate = self
            .working
            .schedule_entries
            .values()
            .any(|other| other.case_id == entry.case_id && other.is_active());
        if duplicate {
            return Err(CaseEngineError::conflict(format!("Case {} is already scheduled", entry.case_id)));
        }
        self.working.schedule_entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn update_schedule_entry(&mut self, entry: &CaseScheduleEntry) -> Result<()> {
        match self.working.schedule_entries.get_mut(&entry.id) {
            Some(stored) => {
                *stored = entry.clone();
                Ok(())
            }
            None => Err(CaseEngineError::not_found(format!("Schedule entry {}", entry.id))),
        }
    }

    async fn find_active_schedule_entry(&mut self, case_id: CaseId) -> Result<Option<CaseScheduleEntry>> {
        Ok(self
            .working
            .schedule_entries
            .values()
            .find(|entry| entry.case_id == case_id && entry.is_active())
            .cloned())
    }

    async fn list_active_schedule_entries(&mut self) -> Result<Vec<CaseScheduleEntry>> {
        let entries = self
            .working
            .schedule_entries
            .values()
            .filter(|entry| entry.is_active())
            .cloned()
            .collect();
        Ok(oldest_first(entries, |entry: &CaseScheduleEntry| (entry.due_at, entry.id)))
    }

    async fn tombstone_schedule_entry(&mut self, entry_id: ScheduleEntryId, at: DateTime<Utc>) -> Result<()> {
        if let Some(entry) = self.working.schedule_entries.get_mut(&entry_id) {
            entry.deleted_at.get_or_insert(at);
        }
        Ok(())
    }
}

#[async_trait]
impl TelephonySessionRepository for MemoryTx {
    async fn insert_telephony_session(&mut self, session: &TelephonySession) -> Result<()> {
        if self.working.telephony_sessions.contains_key(&session.id) {
            return Err(CaseEngineError::conflict(format!(
                "Telephony session {} already exists",
                session.id
            )));
        }
        self.working.telephony_sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn update_telephony_session(&mut self, session: &TelephonySession) -> Result<()> {
        match self.working.telephony_sessions.get_mut(&session.id) {
            Some(stored) => {
                stored.forwarded = session.forwarded;
                stored.ended_at = session.ended_at;
                stored.provider_reference = session.provider_reference.clone();
                Ok(())
            }
            None => Err(CaseEngineError::not_found(format!("Telephony session {}", session.id))),
        }
    }

    async fn find_telephony_session(
        &mut self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Option<TelephonySession>> {
        Ok(self.working.telephony_sessions.get(&telephony_session_id).cloned())
    }

    async fn find_telephony_session_by_provider_reference(
        &mut self,
        provider_reference: &str,
    ) -> Result<Option<TelephonySession>> {
        Ok(self
            .working
            .telephony_sessions
            .values()
            .find(|session| session.provider_reference.as_deref() == Some(provider_reference))
            .cloned())
    }

    async fn append_channel_event(
        &mut self,
        telephony_session_id: TelephonySessionId,
        event: &ChannelEvent,
    ) -> Result<()> {
        let session = self
            .working
            .telephony_sessions
            .get_mut(&telephony_session_id)
            .ok_or_else(|| CaseEngineError::not_found(format!("Telephony session {}", telephony_session_id)))?;

        if session.events.iter().any(|existing| existing.sequence == event.sequence) {
            return Err(CaseEngineError::conflict(format!(
                "Telephony session {} already has event #{}",
                telephony_session_id, event.sequence
            )));
        }
        session.events.push(event.clone());
        Ok(())
    }
}
