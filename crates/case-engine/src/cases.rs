//! Case lifecycle: open, close, unassign

use tracing::{debug, info};

use crate::agent::manager::apply_log_entry;
use crate::agent::{AgentSession, AgentSessionStatus};
use crate::context::EngineContext;
use crate::error::{CaseEngineError, Result};
use crate::events::{BroadcastMessage, DomainEvent, EventOutbox};
use crate::locks::LockGuard;
use crate::queue::manager::dequeue_in;
use crate::queue::schedule::cancel_in;
use crate::store::StoreTx;
use crate::types::{Case, CaseId, NewCase, TelephonySessionId};

const LOCK_ATTEMPTS: usize = 3;

/// A case loaded under its lock and the lock of the session holding it
struct LockedCase {
    guards: Vec<LockGuard>,
    tx: Box<dyn StoreTx>,
    case: Case,
    holder: Option<AgentSession>,
}

pub struct CaseManager {
    ctx: EngineContext,
}

impl CaseManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn open_case(&self, new_case: NewCase) -> Result<Case> {
        let case = Case::new(new_case, self.ctx.now());

        let mut tx = self.ctx.begin().await?;
        tx.insert_case(&case).await?;

        let mut outbox = EventOutbox::new();
        outbox.record(DomainEvent::CaseCreated { case_id: case.id });
        outbox.broadcast(BroadcastMessage::case_changed(case.id));
        self.ctx.commit(tx, outbox, Vec::new()).await?;

        info!(
            "🆕 Opened {} case {} for work group {} via {}",
            case.case_type.as_str(),
            case.id,
            case.work_group_id,
            case.contact_method.as_str()
        );
        Ok(case)
    }

    /// Close a case
    ///
    /// Queue and schedule entries are removed. The session holding the case
    /// moves to wrap-up and keeps the case reference until the agent resets
    /// it. Closing a closed case returns it unchanged.
    pub async fn close_case(&self, case_id: CaseId, garbage_reason: Option<String>) -> Result<Case> {
        let LockedCase {
            guards,
            mut tx,
            mut case,
            holder,
        } = self.lock_case_with_holder(case_id).await?;

        if case.is_closed() {
            debug!("Case {} already closed", case_id);
            return Ok(case);
        }

        let now = self.ctx.now();
        let mut outbox = EventOutbox::new();

        case.close(garbage_reason, now);
        tx.update_case(&case).await?;
        dequeue_in(tx.as_mut(), &mut outbox, case_id, now).await?;
        cancel_in(tx.as_mut(), case_id, now).await?;

        if let Some(mut session) = holder {
            let telephony_session_id = session.current_telephony_session_id();
            apply_log_entry(
                tx.as_mut(),
                &mut outbox,
                &mut session,
                AgentSessionStatus::WrapUp,
                Some(case_id),
                telephony_session_id,
                now,
            )
            .await?;
        }

        outbox.record(DomainEvent::CaseClosed { case_id });
        outbox.broadcast(BroadcastMessage::case_changed(case_id));
        self.ctx.commit(tx, outbox, guards).await?;

        info!(
            "🏁 Closed case {}{}",
            case_id,
            case.garbage_reason
                .as_deref()
                .map(|reason| format!(" (garbage: {})", reason))
                .unwrap_or_default()
        );
        Ok(case)
    }

    /// Take an assigned case away from its agent and reopen it
    pub async fn unassign_case(&self, case_id: CaseId) -> Result<Case> {
        let LockedCase {
            guards,
            mut tx,
            mut case,
            holder,
        } = self.lock_case_with_holder(case_id).await?;

        if !case.is_assigned() {
            return Err(CaseEngineError::invalid_state(format!(
                "Case {} is {} and cannot be unassigned",
                case_id,
                case.status.as_str()
            )));
        }

        let now = self.ctx.now();
        let mut outbox = EventOutbox::new();

        case.unassign();
        tx.update_case(&case).await?;
        outbox.broadcast(BroadcastMessage::case_changed(case_id));

        match holder {
            Some(mut session) => {
                apply_log_entry(
                    tx.as_mut(),
                    &mut outbox,
                    &mut session,
                    AgentSessionStatus::Ready,
                    None,
                    None,
                    now,
                )
                .await?;
            }
            None => {
                outbox.record(DomainEvent::CaseWasUnassigned {
                    case_id,
                    telephony_session_id: case.telephony_session_id,
                });
                outbox.broadcast(BroadcastMessage::case_assignment_changed());
            }
        }
        self.ctx.commit(tx, outbox, guards).await?;

        info!("↩️ Unassigned case {}", case_id);
        Ok(case)
    }

    pub async fn find_case(&self, case_id: CaseId) -> Result<Option<Case>> {
        let mut tx = self.ctx.begin().await?;
        tx.find_case(case_id).await
    }

    pub async fn find_cases_by_telephony_session(&self, telephony_session_id: TelephonySessionId) -> Result<Vec<Case>> {
        let mut tx = self.ctx.begin().await?;
        tx.find_cases_by_telephony_session(telephony_session_id).await
    }

    /// Lock the case, then the session currently holding it
    async fn lock_case_with_holder(&self, case_id: CaseId) -> Result<LockedCase> {
        for attempt in 1..=LOCK_ATTEMPTS {
            let expected_holder = {
                let mut tx = self.ctx.begin().await?;
                tx.find_active_session_by_case(case_id)
                    .await?
                    .map(|session| session.id)
            };

            let mut guards = vec![self.ctx.locks.lock_case(case_id).await];
            if let Some(agent_session_id) = expected_holder {
                guards.push(self.ctx.locks.lock_agent_session(agent_session_id).await);
            }

            let mut tx = self.ctx.begin().await?;
            let case = tx
                .find_case(case_id)
                .await?
                .ok_or_else(|| CaseEngineError::not_found(format!("Case {}", case_id)))?;
            let holder = tx.find_active_session_by_case(case_id).await?;

            if holder.as_ref().map(|session| session.id) == expected_holder {
                return Ok(LockedCase {
                    guards,
                    tx,
                    case,
                    holder,
                });
            }

            debug!(
                "🔁 Case {} changed holder while locking (attempt {}/{})",
                case_id, attempt, LOCK_ATTEMPTS
            );
        }

        Err(CaseEngineError::conflict(format!(
            "Case {} kept changing holder while being locked",
            case_id
        )))
    }
}
