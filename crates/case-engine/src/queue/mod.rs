//! # Case Queue and Schedule
//!
//! Pending cases wait in the queue until the matcher hands them to an agent.
//! Cases that should only become visible later wait in the schedule instead.
//! A case is never queued and scheduled at the same time.
//!
//! Queue listings are partitioned by [`AssignmentClass`]: interactive cases (a
//! customer waiting on a live line) always come before passive ones, and each
//! partition is ordered first-in first-out by queue entry creation time.

pub mod manager;
pub mod schedule;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AssignmentClass, Case, CaseId, QueueEntryId, ScheduleEntryId, WorkGroupId};

pub use manager::CaseQueueManager;
pub use schedule::{CaseScheduleManager, DueCasesReport};

/// A case waiting for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseQueueEntry {
    pub id: QueueEntryId,
    pub case_id: CaseId,
    pub work_group_id: WorkGroupId,
    /// Whether the matcher may pick this entry up
    pub automatically_assign: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CaseQueueEntry {
    pub fn new(case: &Case, automatically_assign: bool, created_at: DateTime<Utc>) -> Self {
        Self {
            id: QueueEntryId::new(),
            case_id: case.id,
            work_group_id: case.work_group_id.clone(),
            automatically_assign,
            created_at,
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// A case deferred until `due_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseScheduleEntry {
    pub id: ScheduleEntryId,
    pub case_id: CaseId,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl CaseScheduleEntry {
    pub fn new(case_id: CaseId, due_at: DateTime<Utc>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: ScheduleEntryId::new(),
            case_id,
            due_at,
            created_at,
            deleted_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

/// Queue entry joined with its case and current assignment class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedCase {
    pub entry: CaseQueueEntry,
    pub case: Case,
    pub class: AssignmentClass,
}

impl QueuedCase {
    pub fn case_id(&self) -> CaseId {
        self.case.id
    }
}

/// Interactive before passive, then FIFO within the class
pub(crate) fn queue_order(a: &QueuedCase, b: &QueuedCase) -> Ordering {
    a.class
        .cmp(&b.class)
        .then_with(|| a.entry.created_at.cmp(&b.entry.created_at))
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}
