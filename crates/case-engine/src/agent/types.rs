//! Agent session model

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    AgentId, AgentSessionId, AssignmentClass, CaseId, InternalPhoneId, LogEntryId, TelephonySessionId,
    WorkGroupId,
};

/// What an agent is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSessionStatus {
    /// Waiting for work
    #[default]
    Ready,
    /// Working a case
    Busy,
    /// Finishing up a closed case
    WrapUp,
    Break,
}

impl AgentSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentSessionStatus::Ready => "ready",
            AgentSessionStatus::Busy => "busy",
            AgentSessionStatus::WrapUp => "wrap_up",
            AgentSessionStatus::Break => "break",
        }
    }
}

impl FromStr for AgentSessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(AgentSessionStatus::Ready),
            "busy" => Ok(AgentSessionStatus::Busy),
            "wrap_up" => Ok(AgentSessionStatus::WrapUp),
            "break" => Ok(AgentSessionStatus::Break),
            _ => Err(format!("Unknown agent session status: {}", s)),
        }
    }
}

/// Immutable snapshot of an agent session's state
///
/// Transitions never modify an entry: a successor is inserted and the
/// predecessor is tombstoned through `deleted_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSessionLogEntry {
    pub id: LogEntryId,
    pub agent_session_id: AgentSessionId,
    pub status: AgentSessionStatus,
    pub case_id: Option<CaseId>,
    pub telephony_session_id: Option<TelephonySessionId>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AgentSessionLogEntry {
    /// Entry a session starts with: ready, no case, no call
    pub fn initial(agent_session_id: AgentSessionId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: LogEntryId::new(),
            agent_session_id,
            status: AgentSessionStatus::default(),
            case_id: None,
            telephony_session_id: None,
            created_at,
            deleted_at: None,
        }
    }

    pub fn successor(
        &self,
        status: AgentSessionStatus,
        case_id: Option<CaseId>,
        telephony_session_id: Option<TelephonySessionId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LogEntryId::new(),
            agent_session_id: self.agent_session_id,
            status,
            case_id,
            telephony_session_id,
            created_at,
            deleted_at: None,
        }
    }

    pub fn is_current(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// One agent's working session, from login to logout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub id: AgentSessionId,
    pub agent_id: AgentId,
    pub internal_phone_id: InternalPhoneId,
    /// Lower values are served first, `None` is served last
    pub priority: Option<i32>,
    pub assign_cases_automatically: bool,
    pub work_groups: BTreeSet<WorkGroupId>,
    /// Current log entry
    pub log_entry: AgentSessionLogEntry,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AgentSession {
    pub fn start(
        agent_id: AgentId,
        internal_phone_id: InternalPhoneId,
        assign_cases_automatically: bool,
        priority: Option<i32>,
        work_groups: impl IntoIterator<Item = WorkGroupId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = AgentSessionId::new();
        Self {
            id,
            agent_id,
            internal_phone_id,
            priority,
            assign_cases_automatically,
            work_groups: work_groups.into_iter().collect(),
            log_entry: AgentSessionLogEntry::initial(id, created_at),
            created_at,
            deleted_at: None,
        }
    }

    /// Not ended
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn status(&self) -> AgentSessionStatus {
        self.log_entry.status
    }

    pub fn current_case_id(&self) -> Option<CaseId> {
        self.log_entry.case_id
    }

    pub fn current_telephony_session_id(&self) -> Option<TelephonySessionId> {
        self.log_entry.telephony_session_id
    }

    pub fn serves_work_group(&self, work_group_id: &WorkGroupId) -> bool {
        self.work_groups.contains(work_group_id)
    }

    /// Whether the matcher may hand this session a case of `class`
    ///
    /// Both classes need an active, automatically assigned, ready session
    /// without a case. Interactive work additionally needs the agent's phone
    /// to be free of any telephony session.
    pub fn is_available_for(&self, class: AssignmentClass) -> bool {
        let idle = self.is_active()
            && self.assign_cases_automatically
            && self.status() == AgentSessionStatus::Ready
            && self.current_case_id().is_none();

        match class {
            AssignmentClass::Interactive => idle && self.current_telephony_session_id().is_none(),
            AssignmentClass::Passive => idle,
        }
    }
}

/// Lower priority value first, `None` last, then older sessions first
pub fn compare_by_priority(a: &AgentSession, b: &AgentSession) -> Ordering {
    let by_priority = match (a.priority, b.priority) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_priority
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
