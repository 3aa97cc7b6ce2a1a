//! Case queue manager

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::context::EngineContext;
use crate::error::{CaseEngineError, Result};
use crate::events::{BroadcastMessage, DomainEvent, EventOutbox};
use crate::store::StoreTx;
use crate::types::{AssignmentClass, Case, CaseId, ContactMethod, WorkGroupId};

use super::{queue_order, CaseQueueEntry, QueuedCase};

/// Current assignment class of a case
pub(crate) async fn classify(tx: &mut dyn StoreTx, case: &Case) -> Result<AssignmentClass> {
    let telephony_session = match case.telephony_session_id {
        Some(telephony_session_id) if case.contact_method == ContactMethod::Telephony => {
            tx.find_telephony_session(telephony_session_id).await?
        }
        _ => None,
    };
    Ok(AssignmentClass::of(case, telephony_session.as_ref()))
}

/// Enqueue inside an open unit of work; the caller holds the case lock
///
/// Returns the existing entry when the case is already queued.
pub(crate) async fn enqueue_in(
    tx: &mut dyn StoreTx,
    outbox: &mut EventOutbox,
    case_id: CaseId,
    now: DateTime<Utc>,
) -> Result<CaseQueueEntry> {
    let case = tx
        .find_case(case_id)
        .await?
        .ok_or_else(|| CaseEngineError::not_found(format!("Case {}", case_id)))?;

    if !case.is_unassigned_open() {
        return Err(CaseEngineError::invalid_state(format!(
            "Case {} is {} and cannot be queued",
            case_id,
            case.status.as_str()
        )));
    }
    if tx.find_active_schedule_entry(case_id).await?.is_some() {
        return Err(CaseEngineError::invalid_state(format!(
            "Case {} is scheduled and cannot be queued",
            case_id
        )));
    }
    if let Some(existing) = tx.find_active_queue_entry(case_id).await? {
        debug!("📋 Case {} already queued, keeping entry {}", case_id, existing.id);
        return Ok(existing);
    }

    let class = classify(tx, &case).await?;
    let queued_before = !tx.find_queue_entries_by_case(case_id).await?.is_empty();
    let automatically_assign = !(class == AssignmentClass::Passive && queued_before);

    let entry = CaseQueueEntry::new(&case, automatically_assign, now);
    tx.insert_queue_entry(&entry).await?;

    outbox.record(DomainEvent::CaseOnQueue);
    outbox.broadcast(BroadcastMessage::queue_changed());

    info!(
        "📞 Enqueued {} case {} for work group {} (automatic assignment: {})",
        class, case_id, case.work_group_id, automatically_assign
    );
    Ok(entry)
}

/// Tombstone the active entry of a case, if any; the caller holds the case lock
pub(crate) async fn dequeue_in(
    tx: &mut dyn StoreTx,
    outbox: &mut EventOutbox,
    case_id: CaseId,
    now: DateTime<Utc>,
) -> Result<bool> {
    match tx.find_active_queue_entry(case_id).await? {
        Some(entry) => {
            tx.tombstone_queue_entry(entry.id, now).await?;
            outbox.broadcast(BroadcastMessage::queue_changed());
            debug!("📤 Dequeued case {} (entry {})", case_id, entry.id);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Every active entry joined with its case, interactive first then FIFO
pub(crate) async fn load_queue(tx: &mut dyn StoreTx) -> Result<Vec<QueuedCase>> {
    let entries = tx.list_active_queue_entries().await?;
    let mut queued = Vec::with_capacity(entries.len());

    for entry in entries {
        let Some(case) = tx.find_case(entry.case_id).await? else {
            warn!("⚠️ Queue entry {} references unknown case {}", entry.id, entry.case_id);
            continue;
        };
        let class = classify(tx, &case).await?;
        queued.push(QueuedCase { entry, case, class });
    }

    queued.sort_by(queue_order);
    Ok(queued)
}

/// Ordered, lockable queue of pending cases
pub struct CaseQueueManager {
    ctx: EngineContext,
}

impl CaseQueueManager {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Put a case on the queue
    ///
    /// Automatic assignment is disabled only for a passive case that has been
    /// queued before.
    pub async fn enqueue(&self, case_id: CaseId) -> Result<CaseQueueEntry> {
        let guard = self.ctx.locks.lock_case(case_id).await;
        let mut tx = self.ctx.begin().await?;
        let mut outbox = EventOutbox::new();

        let entry = enqueue_in(tx.as_mut(), &mut outbox, case_id, self.ctx.now()).await?;
        self.ctx.commit(tx, outbox, vec![guard]).await?;

        Ok(entry)
    }

    /// Remove a case from the queue; returns whether it was queued
    pub async fn dequeue_by_case(&self, case_id: CaseId) -> Result<bool> {
        let guard = self.ctx.locks.lock_case(case_id).await;
        let mut tx = self.ctx.begin().await?;
        let mut outbox = EventOutbox::new();

        let removed = dequeue_in(tx.as_mut(), &mut outbox, case_id, self.ctx.now()).await?;
        self.ctx.commit(tx, outbox, vec![guard]).await?;

        Ok(removed)
    }

    pub async fn is_queued(&self, case_id: CaseId) -> Result<bool> {
        let mut tx = self.ctx.begin().await?;
        Ok(tx.find_active_queue_entry(case_id).await?.is_some())
    }

    pub async fn find_active_entry(&self, case_id: CaseId) -> Result<Option<CaseQueueEntry>> {
        let mut tx = self.ctx.begin().await?;
        tx.find_active_queue_entry(case_id).await
    }

    /// Interactive cases first, then passive ones, each oldest first
    pub async fn get_all(&self) -> Result<Vec<QueuedCase>> {
        let mut tx = self.ctx.begin().await?;
        load_queue(tx.as_mut()).await
    }

    pub async fn get_all_by_work_groups(&self, work_groups: &[WorkGroupId]) -> Result<Vec<QueuedCase>> {
        let mut queued = self.get_all().await?;
        queued.retain(|queued| work_groups.contains(&queued.entry.work_group_id));
        Ok(queued)
    }

    /// Entries of `class` the matcher may pick up, oldest first
    pub async fn get_assignable_cases(&self, class: AssignmentClass) -> Result<Vec<QueuedCase>> {
        let mut queued = self.get_all().await?;
        queued.retain(|queued| queued.class == class && queued.entry.automatically_assign);
        Ok(queued)
    }

    pub async fn get_assignable_interactive_cases_by_prio(&self) -> Result<Vec<QueuedCase>> {
        self.get_assignable_cases(AssignmentClass::Interactive).await
    }

    pub async fn get_assignable_passive_cases_by_prio(&self) -> Result<Vec<QueuedCase>> {
        self.get_assignable_cases(AssignmentClass::Passive).await
    }

    /// Earliest entry ever created for the case, tombstoned ones included
    pub async fn find_initial_queue_entry_by_case(&self, case_id: CaseId) -> Result<Option<CaseQueueEntry>> {
        let mut tx = self.ctx.begin().await?;
        Ok(tx.find_queue_entries_by_case(case_id).await?.into_iter().next())
    }

    /// Enqueue open cases that are neither queued nor scheduled
    pub async fn requeue_orphaned_cases(&self) -> Result<Vec<CaseId>> {
        let orphaned: Vec<CaseId> = {
            let mut tx = self.ctx.begin().await?;
            let mut orphaned = Vec::new();
            for case in tx.find_unfulfilled_cases().await? {
                if tx.find_active_queue_entry(case.id).await?.is_none()
                    && tx.find_active_schedule_entry(case.id).await?.is_none()
                {
                    orphaned.push(case.id);
                }
            }
            orphaned
        };

        let mut requeued = Vec::with_capacity(orphaned.len());
        for case_id in orphaned {
            match self.enqueue(case_id).await {
                Ok(_) => requeued.push(case_id),
                Err(CaseEngineError::InvalidState(reason)) => {
                    debug!("Case {} changed before it could be requeued: {}", case_id, reason)
                }
                Err(e) => warn!("⚠️ Failed to requeue orphaned case {}: {}", case_id, e),
            }
        }

        if !requeued.is_empty() {
            info!("🔄 Requeued {} orphaned case(s)", requeued.len());
        }
        Ok(requeued)
    }
}
