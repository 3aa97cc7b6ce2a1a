//! Agent session lifecycle and the append-only status log

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{CaseEngineError, Result};
use crate::events::{BroadcastMessage, DomainEvent, EventOutbox};
use crate::locks::LockGuard;
use crate::queue::manager::dequeue_in;
use crate::store::StoreTx;
use crate::telephony::DerivedTelephonyState;
use crate::types::{
    AgentId, AgentSessionId, AssignmentClass, CaseId, InternalPhoneId, TelephonySessionId, WorkGroupId,
};

use super::types::{compare_by_priority, AgentSession, AgentSessionLogEntry, AgentSessionStatus};

/// How often to re-read a session whose case changed while we waited for locks
const LOCK_ATTEMPTS: usize = 3;

/// A session loaded under its case lock (if any) and its own lock
pub(crate) struct LockedSession {
    pub guards: Vec<LockGuard>,
    pub tx: Box<dyn StoreTx>,
    pub session: AgentSession,
}

/// Lock the case a session currently holds, then the session itself
///
/// The case is only known after reading the session, so the read is repeated
/// under the locks and retried when the session moved to another case in the
/// meantime.
pub(crate) async fn lock_session_with_case(
    ctx: &EngineContext,
    agent_session_id: AgentSessionId,
) -> Result<LockedSession> {
    lock_session_with_cases(ctx, agent_session_id, None).await
}

/// Like [`lock_session_with_case`], additionally locking `incoming`
///
/// Case locks are taken in id order before the session lock.
async fn lock_session_with_cases(
    ctx: &EngineContext,
    agent_session_id: AgentSessionId,
    incoming: Option<CaseId>,
) -> Result<LockedSession> {
    for attempt in 1..=LOCK_ATTEMPTS {
        let peeked = {
            let mut tx = ctx.begin().await?;
            tx.find_agent_session(agent_session_id).await?
        }
        .ok_or_else(|| CaseEngineError::not_found(format!("Agent session {}", agent_session_id)))?;
        let expected_case = peeked.current_case_id();

        let mut case_ids: Vec<CaseId> = expected_case.into_iter().chain(incoming).collect();
        case_ids.sort();
        case_ids.dedup();

        let mut guards = Vec::with_capacity(case_ids.len() + 1);
        for case_id in case_ids {
            guards.push(ctx.locks.lock_case(case_id).await);
        }
        guards.push(ctx.locks.lock_agent_session(agent_session_id).await);

        let mut tx = ctx.begin().await?;
        let session = tx
            .find_agent_session(agent_session_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Agent session {}", agent_session_id)))?;

        if session.current_case_id() == expected_case {
            return Ok(LockedSession { guards, tx, session });
        }

        debug!(
            "🔁 Agent session {} changed case while locking (attempt {}/{})",
            agent_session_id, attempt, LOCK_ATTEMPTS
        );
    }

    Err(CaseEngineError::conflict(format!(
        "Agent session {} kept changing while being locked",
        agent_session_id
    )))
}

pub(crate) fn ensure_active(session: &AgentSession) -> Result<()> {
    if session.is_active() {
        Ok(())
    } else {
        Err(CaseEngineError::NoActiveSession {
            agent_id: session.agent_id.clone(),
        })
    }
}

/// Hand an open case to the session's agent; the caller holds the case lock
///
/// The case leaves the queue. A case already assigned to this agent is left
/// as it is.
async fn take_case_in(
    tx: &mut dyn StoreTx,
    outbox: &mut EventOutbox,
    session: &AgentSession,
    case_id: CaseId,
    at: DateTime<Utc>,
) -> Result<()> {
    let mut case = tx
        .find_case(case_id)
        .await?
        .ok_or_else(|| CaseEngineError::not_found(format!("Case {}", case_id)))?;

    if case.is_assigned() {
        if case.assigned_agent_id.as_ref() == Some(&session.agent_id) {
            return Ok(());
        }
        return Err(CaseEngineError::invalid_state(format!(
            "Case {} is assigned to another agent",
            case_id
        )));
    }
    if !case.is_unassigned_open() {
        return Err(CaseEngineError::invalid_state(format!(
            "Case {} is {} and cannot be taken",
            case_id,
            case.status.as_str()
        )));
    }
    if tx.find_active_schedule_entry(case_id).await?.is_some() {
        return Err(CaseEngineError::invalid_state(format!(
            "Case {} is scheduled and cannot be taken",
            case_id
        )));
    }

    dequeue_in(tx, outbox, case_id, at).await?;
    case.assign_to(session.agent_id.clone());
    tx.update_case(&case).await?;
    outbox.broadcast(BroadcastMessage::case_changed(case_id));

    info!("✋ Agent {} took case {} (session {})", session.agent_id, case_id, session.id);
    Ok(())
}

/// Append a log entry and tombstone the current one
///
/// Emits `CaseAgentAssigned` when a new case appears on the session and
/// `CaseWasUnassigned` when the case disappears. A status-only transition emits
/// no domain event. A released case that is still assigned to this agent is
/// reopened in the same unit of work.
pub(crate) async fn apply_log_entry(
    tx: &mut dyn StoreTx,
    outbox: &mut EventOutbox,
    session: &mut AgentSession,
    status: AgentSessionStatus,
    case_id: Option<CaseId>,
    telephony_session_id: Option<TelephonySessionId>,
    at: DateTime<Utc>,
) -> Result<AgentSessionLogEntry> {
    let previous = session.log_entry.clone();
    let next = previous.successor(status, case_id, telephony_session_id, at);

    tx.tombstone_log_entry(previous.id, at).await?;
    tx.insert_log_entry(&next).await?;
    session.log_entry = next.clone();
    tx.update_agent_session(session).await?;

    debug!(
        "📝 Agent session {} -> {} (case: {:?}, telephony session: {:?})",
        session.id,
        status.as_str(),
        case_id,
        telephony_session_id
    );

    if previous.case_id != next.case_id {
        match (next.case_id, previous.case_id) {
            (Some(assigned), _) => {
                outbox.record(DomainEvent::CaseAgentAssigned {
                    case_id: assigned,
                    agent_session_id: session.id,
                });
                outbox.broadcast(BroadcastMessage::agent_session_case_assigned(session.id, assigned));
                outbox.broadcast(BroadcastMessage::case_assignment_changed());
            }
            (None, Some(released)) => {
                if let Some(mut case) = tx.find_case(released).await? {
                    if case.is_assigned() && case.assigned_agent_id.as_ref() == Some(&session.agent_id) {
                        case.unassign();
                        tx.update_case(&case).await?;
                        outbox.broadcast(BroadcastMessage::case_changed(released));
                    }
                }
                outbox.record(DomainEvent::CaseWasUnassigned {
                    case_id: released,
                    telephony_session_id: previous.telephony_session_id,
                });
                outbox.broadcast(BroadcastMessage::case_assignment_changed());
            }
            (None, None) => {}
        }
    }

    if previous.telephony_session_id.is_some() && next.telephony_session_id.is_none() {
        outbox.broadcast(BroadcastMessage::telephony_session_detached(session.id));
    }

    Ok(next)
}

/// Starts, ends and transitions agent sessions
pub struct AgentSessionManager {
    ctx: EngineContext,
}

impl AgentSessionManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Start a session for an agent that has none
    ///
    /// Fails with [`CaseEngineError::DuplicateActiveSession`] when the agent
    /// already has an active session.
    pub async fn create_and_start_session(
        &self,
        agent_id: impl Into<AgentId>,
        internal_phone_id: impl Into<InternalPhoneId>,
        assign_cases_automatically: bool,
        priority: Option<i32>,
        work_groups: impl IntoIterator<Item = WorkGroupId>,
    ) -> Result<AgentSession> {
        let session = AgentSession::start(
            agent_id.into(),
            internal_phone_id.into(),
            assign_cases_automatically,
            priority,
            work_groups,
            self.ctx.now(),
        );

        let mut tx = self.ctx.begin().await?;
        tx.insert_agent_session(&session).await?;

        let mut outbox = EventOutbox::new();
        outbox.record(DomainEvent::AgentSessionStarted {
            agent_session_id: session.id,
        });
        self.ctx.commit(tx, outbox, Vec::new()).await?;

        info!(
            "👤 Started agent session {} for agent {} (priority: {:?}, work groups: {:?})",
            session.id, session.agent_id, session.priority, session.work_groups
        );
        Ok(session)
    }

    /// End a session that no longer holds an assigned case
    ///
    /// Fails with [`CaseEngineError::CannotEndSession`] while the current log
    /// entry references an open, assigned case.
    pub async fn end_session(&self, agent_session_id: AgentSessionId) -> Result<()> {
        let LockedSession {
            guards,
            mut tx,
            mut session,
        } = lock_session_with_case(&self.ctx, agent_session_id).await?;
        ensure_active(&session)?;

        if let Some(case_id) = session.current_case_id() {
            if let Some(case) = tx.find_case(case_id).await? {
                if case.is_assigned() {
                    return Err(CaseEngineError::CannotEndSession {
                        agent_session_id,
                        case_id,
                    });
                }
            }
        }

        let now = self.ctx.now();
        let mut outbox = EventOutbox::new();
        if session.current_telephony_session_id().is_some() {
            outbox.broadcast(BroadcastMessage::telephony_session_detached(session.id));
        }
        tx.tombstone_log_entry(session.log_entry.id, now).await?;
        session.deleted_at = Some(now);
        tx.update_agent_session(&session).await?;
        self.ctx.commit(tx, outbox, guards).await?;

        info!("👋 Ended agent session {} of agent {}", session.id, session.agent_id);
        Ok(())
    }

    /// End a session unconditionally, reopening any case it holds
    ///
    /// Ending an already ended session is a no-op.
    pub async fn force_end_session(&self, agent_session_id: AgentSessionId) -> Result<()> {
        let LockedSession {
            guards,
            mut tx,
            mut session,
        } = lock_session_with_case(&self.ctx, agent_session_id).await?;

        if !session.is_active() {
            debug!("Agent session {} already ended", agent_session_id);
            return Ok(());
        }

        let now = self.ctx.now();
        let mut outbox = EventOutbox::new();

        if let Some(case_id) = session.current_case_id() {
            if let Some(mut case) = tx.find_case(case_id).await? {
                if case.is_assigned() {
                    warn!(
                        "⚠️ Force-ending agent session {} releases assigned case {}",
                        agent_session_id, case_id
                    );
                    case.unassign();
                    tx.update_case(&case).await?;
                    outbox.record(DomainEvent::CaseWasUnassigned {
                        case_id,
                        telephony_session_id: session.current_telephony_session_id(),
                    });
                    outbox.broadcast(BroadcastMessage::case_changed(case_id));
                    outbox.broadcast(BroadcastMessage::case_assignment_changed());
                }
            }
        }
        if session.current_telephony_session_id().is_some() {
            outbox.broadcast(BroadcastMessage::telephony_session_detached(session.id));
        }

        tx.tombstone_log_entry(session.log_entry.id, now).await?;
        session.deleted_at = Some(now);
        tx.update_agent_session(&session).await?;
        self.ctx.commit(tx, outbox, guards).await?;

        info!("👋 Force-ended agent session {} of agent {}", session.id, session.agent_id);
        Ok(())
    }

    /// Transition the session to a new log entry
    ///
    /// A case that is not yet on the session is assigned to the agent in the
    /// same unit of work. Fails with [`CaseEngineError::InvalidState`] when
    /// that case is closed, scheduled or assigned to another agent.
    pub async fn update_agent_session_log_entry(
        &self,
        agent_session_id: AgentSessionId,
        status: AgentSessionStatus,
        case_id: Option<CaseId>,
        telephony_session_id: Option<TelephonySessionId>,
    ) -> Result<AgentSessionLogEntry> {
        let LockedSession {
            guards,
            mut tx,
            mut session,
        } = lock_session_with_cases(&self.ctx, agent_session_id, case_id).await?;
        ensure_active(&session)?;

        let now = self.ctx.now();
        let mut outbox = EventOutbox::new();
        if let Some(incoming) = case_id.filter(|id| session.current_case_id() != Some(*id)) {
            take_case_in(tx.as_mut(), &mut outbox, &session, incoming, now).await?;
        }

        let entry = apply_log_entry(
            tx.as_mut(),
            &mut outbox,
            &mut session,
            status,
            case_id,
            telephony_session_id,
            now,
        )
        .await?;
        self.ctx.commit(tx, outbox, guards).await?;

        Ok(entry)
    }

    /// Reset the session to a ready entry without case or call
    pub async fn set_initial_agent_session_log_entry(
        &self,
        agent_session_id: AgentSessionId,
    ) -> Result<AgentSessionLogEntry> {
        self.update_agent_session_log_entry(agent_session_id, AgentSessionStatus::Ready, None, None)
            .await
    }

    /// Change automatic assignment and priority in place
    pub async fn assign_cases_automatically(
        &self,
        agent_session_id: AgentSessionId,
        assign_cases_automatically: bool,
        priority: Option<i32>,
    ) -> Result<AgentSession> {
        let guard = self.ctx.locks.lock_agent_session(agent_session_id).await;
        let mut tx = self.ctx.begin().await?;
        let mut session = tx
            .find_agent_session(agent_session_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Agent session {}", agent_session_id)))?;
        ensure_active(&session)?;

        session.assign_cases_automatically = assign_cases_automatically;
        session.priority = priority;
        tx.update_agent_session(&session).await?;
        self.ctx.commit(tx, EventOutbox::new(), vec![guard]).await?;

        info!(
            "⚙️ Agent session {} automatic assignment: {} (priority: {:?})",
            agent_session_id, assign_cases_automatically, priority
        );
        Ok(session)
    }

    /// Drop the telephony session from the agent's log entry once the agent is
    /// no longer part of that call
    ///
    /// Returns whether the session was detached.
    pub async fn detach_telephony_session(
        &self,
        agent_session_id: AgentSessionId,
        telephony_session_id: TelephonySessionId,
    ) -> Result<bool> {
        let LockedSession {
            guards,
            mut tx,
            mut session,
        } = lock_session_with_case(&self.ctx, agent_session_id).await?;

        if !session.is_active() || session.current_telephony_session_id() != Some(telephony_session_id) {
            return Ok(false);
        }

        if let Some(telephony_session) = tx.find_telephony_session(telephony_session_id).await? {
            let state = DerivedTelephonyState::create_from_telephony_session(&telephony_session);
            if state.agent_participates_in_call() {
                return Ok(false);
            }
        }

        let mut outbox = EventOutbox::new();
        let status = session.status();
        let case_id = session.current_case_id();
        apply_log_entry(
            tx.as_mut(),
            &mut outbox,
            &mut session,
            status,
            case_id,
            None,
            self.ctx.now(),
        )
        .await?;
        self.ctx.commit(tx, outbox, guards).await?;

        info!(
            "📴 Detached telephony session {} from agent session {}",
            telephony_session_id, agent_session_id
        );
        Ok(true)
    }

    pub async fn find_session(&self, agent_session_id: AgentSessionId) -> Result<Option<AgentSession>> {
        let mut tx = self.ctx.begin().await?;
        tx.find_agent_session(agent_session_id).await
    }

    pub async fn find_active_session_for_agent(&self, agent_id: &AgentId) -> Result<AgentSession> {
        let mut tx = self.ctx.begin().await?;
        tx.find_active_session_by_agent(agent_id)
            .await?
            .ok_or_else(|| CaseEngineError::NoActiveSession {
                agent_id: agent_id.clone(),
            })
    }

    pub async fn find_active_sessions_by_telephony_session(
        &self,
        telephony_session_id: TelephonySessionId,
    ) -> Result<Vec<AgentSession>> {
        let mut tx = self.ctx.begin().await?;
        tx.find_active_sessions_by_telephony_session(telephony_session_id)
            .await
    }

    /// Active sessions, highest priority first
    pub async fn active_sessions(&self) -> Result<Vec<AgentSession>> {
        let mut tx = self.ctx.begin().await?;
        let mut sessions = tx.list_active_sessions().await?;
        sessions.sort_by(compare_by_priority);
        Ok(sessions)
    }

    /// Sessions the matcher may hand a case of `class`, highest priority first
    pub async fn available_sessions(&self, class: AssignmentClass) -> Result<Vec<AgentSession>> {
        let mut sessions = self.active_sessions().await?;
        sessions.retain(|session| session.is_available_for(class));
        Ok(sessions)
    }

    /// Active sessions whose current log entry is older than `cutoff`
    pub async fn inactive_sessions(&self, cutoff: DateTime<Utc>) -> Result<Vec<AgentSession>> {
        let mut sessions = self.active_sessions().await?;
        sessions.retain(|session| session.log_entry.created_at < cutoff);
        Ok(sessions)
    }

    /// Full log of a session, oldest first
    pub async fn log_history(&self, agent_session_id: AgentSessionId) -> Result<Vec<AgentSessionLogEntry>> {
        let mut tx = self.ctx.begin().await?;
        tx.list_log_entries(agent_session_id).await
    }
}
