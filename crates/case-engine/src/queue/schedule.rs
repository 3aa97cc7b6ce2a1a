//! Deferred queue visibility for cases
//!
//! Every mutating operation takes the same per-case lock as the queue manager,
//! so it is safe against the periodic due-case sweep and concurrent requests.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::agent::manager::{apply_log_entry, ensure_active};
use crate::agent::{AgentSessionLogEntry, AgentSessionStatus};
use crate::context::EngineContext;
use crate::error::{CaseEngineError, Result};
use crate::events::{BroadcastMessage, EventOutbox};
use crate::store::StoreTx;
use crate::types::{AgentSessionId, AssignmentClass, CaseId};

use super::manager::{classify, dequeue_in, enqueue_in};
use super::{CaseQueueEntry, CaseScheduleEntry};

/// Outcome of one due-case sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DueCasesReport {
    pub queued: Vec<CaseId>,
    /// Entries consumed by a concurrent path before the sweep reached them
    pub skipped: Vec<CaseId>,
    pub failed: Vec<CaseId>,
}

/// Tombstone the active schedule entry of a case, if any; the caller holds
/// the case lock
pub(crate) async fn cancel_in(tx: &mut dyn StoreTx, case_id: CaseId, now: DateTime<Utc>) -> Result<bool> {
    match tx.find_active_schedule_entry(case_id).await? {
        Some(entry) => {
            tx.tombstone_schedule_entry(entry.id, now).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn require_schedule_entry(tx: &mut dyn StoreTx, case_id: CaseId) -> Result<CaseScheduleEntry> {
    tx.find_active_schedule_entry(case_id)
        .await?
        .ok_or(CaseEngineError::CaseNotScheduled { case_id })
}

pub struct CaseScheduleManager {
    ctx: EngineContext,
}

impl CaseScheduleManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Defer a case until `due_at`
    ///
    /// The case leaves the queue and any previous schedule entry is replaced.
    pub async fn schedule_case(&self, case_id: CaseId, due_at: DateTime<Utc>) -> Result<CaseScheduleEntry> {
        let guard = self.ctx.locks.lock_case(case_id).await;
        let mut tx = self.ctx.begin().await?;
        let mut outbox = EventOutbox::new();
        let now = self.ctx.now();

        let case = tx
            .find_case(case_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Case {}", case_id)))?;
        if !case.is_unassigned_open() {
            return Err(CaseEngineError::invalid_state(format!(
                "Case {} is {} and cannot be scheduled",
                case_id,
                case.status.as_str()
            )));
        }

        dequeue_in(tx.as_mut(), &mut outbox, case_id, now).await?;
        cancel_in(tx.as_mut(), case_id, now).await?;

        let entry = CaseScheduleEntry::new(case_id, due_at, now);
        tx.insert_schedule_entry(&entry).await?;
        outbox.broadcast(BroadcastMessage::case_changed(case_id));
        self.ctx.commit(tx, outbox, vec![guard]).await?;

        info!("📅 Scheduled case {} for {}", case_id, due_at);
        Ok(entry)
    }

    pub async fn is_scheduled(&self, case_id: CaseId) -> Result<bool> {
        let mut tx = self.ctx.begin().await?;
        Ok(tx.find_active_schedule_entry(case_id).await?.is_some())
    }

    pub async fn find_schedule_entry(&self, case_id: CaseId) -> Result<Option<CaseScheduleEntry>> {
        let mut tx = self.ctx.begin().await?;
        tx.find_active_schedule_entry(case_id).await
    }

    /// Hand a scheduled case straight to an agent session, bypassing the queue
    pub async fn assign_scheduled_case(
        &self,
        case_id: CaseId,
        agent_session_id: AgentSessionId,
    ) -> Result<AgentSessionLogEntry> {
        let case_guard = self.ctx.locks.lock_case(case_id).await;
        let session_guard = self.ctx.locks.lock_agent_session(agent_session_id).await;
        let mut tx = self.ctx.begin().await?;
        let now = self.ctx.now();

        let entry = require_schedule_entry(tx.as_mut(), case_id).await?;
        let mut session = tx
            .find_agent_session(agent_session_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Agent session {}", agent_session_id)))?;
        ensure_active(&session)?;
        if let Some(held) = session.current_case_id() {
            return Err(CaseEngineError::invalid_state(format!(
                "Agent session {} already holds case {}",
                agent_session_id, held
            )));
        }

        let mut case = tx
            .find_case(case_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Case {}", case_id)))?;
        if !case.is_unassigned_open() {
            return Err(CaseEngineError::invalid_state(format!(
                "Case {} is {} and cannot be assigned",
                case_id,
                case.status.as_str()
            )));
        }

        let mut outbox = EventOutbox::new();
        tx.tombstone_schedule_entry(entry.id, now).await?;
        case.assign_to(session.agent_id.clone());
        tx.update_case(&case).await?;
        outbox.broadcast(BroadcastMessage::case_changed(case_id));

        let telephony_session_id = match classify(tx.as_mut(), &case).await? {
            AssignmentClass::Interactive => case.telephony_session_id,
            AssignmentClass::Passive => None,
        };
        let log_entry = apply_log_entry(
            tx.as_mut(),
            &mut outbox,
            &mut session,
            AgentSessionStatus::Busy,
            Some(case_id),
            telephony_session_id,
            now,
        )
        .await?;
        self.ctx.commit(tx, outbox, vec![case_guard, session_guard]).await?;

        info!(
            "✅ Assigned scheduled case {} to agent {} (session {})",
            case_id, session.agent_id, agent_session_id
        );
        Ok(log_entry)
    }

    /// Move a scheduled case onto the queue now
    pub async fn queue_scheduled_case(&self, case_id: CaseId) -> Result<CaseQueueEntry> {
        let guard = self.ctx.locks.lock_case(case_id).await;
        let mut tx = self.ctx.begin().await?;
        let mut outbox = EventOutbox::new();
        let now = self.ctx.now();

        let entry = require_schedule_entry(tx.as_mut(), case_id).await?;
        tx.tombstone_schedule_entry(entry.id, now).await?;
        let queued = enqueue_in(tx.as_mut(), &mut outbox, case_id, now).await?;
        self.ctx.commit(tx, outbox, vec![guard]).await?;

        info!("📅 Scheduled case {} is now queued", case_id);
        Ok(queued)
    }

    pub async fn reschedule_case(&self, case_id: CaseId, due_at: DateTime<Utc>) -> Result<CaseScheduleEntry> {
        let guard = self.ctx.locks.lock_case(case_id).await;
        let mut tx = self.ctx.begin().await?;

        let mut entry = require_schedule_entry(tx.as_mut(), case_id).await?;
        entry.due_at = due_at;
        tx.update_schedule_entry(&entry).await?;

        let mut outbox = EventOutbox::new();
        outbox.broadcast(BroadcastMessage::case_changed(case_id));
        self.ctx.commit(tx, outbox, vec![guard]).await?;

        info!("📅 Rescheduled case {} for {}", case_id, due_at);
        Ok(entry)
    }

    /// Queue every case whose schedule entry is due
    pub async fn queue_due_cases(&self) -> Result<DueCasesReport> {
        let now = self.ctx.now();
        let due: Vec<CaseId> = {
            let mut tx = self.ctx.begin().await?;
            tx.list_active_schedule_entries()
                .await?
                .into_iter()
                .filter(|entry| entry.is_due(now))
                .map(|entry| entry.case_id)
                .collect()
        };

        let mut report = DueCasesReport::default();
        for case_id in due {
            match self.queue_scheduled_case(case_id).await {
                Ok(_) => report.queued.push(case_id),
                Err(CaseEngineError::CaseNotScheduled { .. }) => {
                    debug!("Case {} was taken off the schedule concurrently", case_id);
                    report.skipped.push(case_id);
                }
                Err(e) => {
                    error!("❌ Failed to queue due case {}: {}", case_id, e);
                    report.failed.push(case_id);
                }
            }
        }

        if !report.queued.is_empty() {
            info!("📅 Queued {} due case(s)", report.queued.len());
        }
        Ok(report)
    }
}
