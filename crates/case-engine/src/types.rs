//! Core identifiers and the service center case model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::telephony::TelephonySession;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

uuid_id!(
    /// Identity of a service center case
    CaseId
);
uuid_id!(
    /// Identity of one agent session (login to logout)
    AgentSessionId
);
uuid_id!(
    /// Identity of a single agent session log entry
    LogEntryId
);
uuid_id!(
    /// Identity of a case queue entry
    QueueEntryId
);
uuid_id!(
    /// Identity of a case schedule entry
    ScheduleEntryId
);
uuid_id!(
    /// Identity of a telephony session (one customer call, possibly many channels)
    TelephonySessionId
);

string_id!(
    /// Reference to an agent (user) managed outside the engine
    AgentId
);
string_id!(
    /// Reference to the internal phone an agent works on
    InternalPhoneId
);
string_id!(
    /// Named routing bucket shared by queue entries and agent sessions
    WorkGroupId
);
string_id!(
    /// Provider identity of one telephony channel (call leg)
    ChannelId
);

/// How the customer reached the service center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Telephony,
    Electronic,
}

impl ContactMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactMethod::Telephony => "telephony",
            ContactMethod::Electronic => "electronic",
        }
    }
}

impl FromStr for ContactMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "telephony" => Ok(ContactMethod::Telephony),
            "electronic" => Ok(ContactMethod::Electronic),
            _ => Err(format!("Unknown contact method: {}", s)),
        }
    }
}

/// Kind of work a case represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseType {
    InboundCall,
    QuoteFollowUp,
    Appointment,
    Callback,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::InboundCall => "inbound_call",
            CaseType::QuoteFollowUp => "quote_follow_up",
            CaseType::Appointment => "appointment",
            CaseType::Callback => "callback",
        }
    }
}

impl FromStr for CaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound_call" => Ok(CaseType::InboundCall),
            "quote_follow_up" => Ok(CaseType::QuoteFollowUp),
            "appointment" => Ok(CaseType::Appointment),
            "callback" => Ok(CaseType::Callback),
            _ => Err(format!("Unknown case type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Assigned,
    Closed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Assigned => "assigned",
            CaseStatus::Closed => "closed",
        }
    }
}

impl FromStr for CaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(CaseStatus::Open),
            "assigned" => Ok(CaseStatus::Assigned),
            "closed" => Ok(CaseStatus::Closed),
            _ => Err(format!("Unknown case status: {}", s)),
        }
    }
}

/// A customer contact waiting for, or being handled by, an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub case_type: CaseType,
    pub work_group_id: WorkGroupId,
    pub contact_method: ContactMethod,
    pub status: CaseStatus,
    pub assigned_agent_id: Option<AgentId>,
    pub telephony_session_id: Option<TelephonySessionId>,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Why the case was closed without being fulfilled
    pub garbage_reason: Option<String>,
}

impl Case {
    pub fn new(new_case: NewCase, started_at: DateTime<Utc>) -> Self {
        Self {
            id: CaseId::new(),
            case_type: new_case.case_type,
            work_group_id: new_case.work_group_id,
            contact_method: new_case.contact_method,
            status: CaseStatus::Open,
            assigned_agent_id: None,
            telephony_session_id: new_case.telephony_session_id,
            started_at,
            closed_at: None,
            garbage_reason: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == CaseStatus::Closed
    }

    /// Open and assigned to an agent
    pub fn is_assigned(&self) -> bool {
        self.status == CaseStatus::Assigned
    }

    /// Open and waiting for an agent
    pub fn is_unassigned_open(&self) -> bool {
        self.status == CaseStatus::Open
    }

    pub fn assign_to(&mut self, agent_id: AgentId) {
        self.status = CaseStatus::Assigned;
        self.assigned_agent_id = Some(agent_id);
    }

    pub fn unassign(&mut self) {
        self.status = CaseStatus::Open;
        self.assigned_agent_id = None;
    }

    pub fn close(&mut self, garbage_reason: Option<String>, at: DateTime<Utc>) {
        self.status = CaseStatus::Closed;
        self.closed_at = Some(at);
        self.garbage_reason = garbage_reason;
    }
}

/// Input for opening a new case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCase {
    pub case_type: CaseType,
    pub work_group_id: WorkGroupId,
    pub contact_method: ContactMethod,
    pub telephony_session_id: Option<TelephonySessionId>,
}

impl NewCase {
    pub fn electronic(case_type: CaseType, work_group_id: impl Into<WorkGroupId>) -> Self {
        Self {
            case_type,
            work_group_id: work_group_id.into(),
            contact_method: ContactMethod::Electronic,
            telephony_session_id: None,
        }
    }

    pub fn telephony(
        case_type: CaseType,
        work_group_id: impl Into<WorkGroupId>,
        telephony_session_id: Option<TelephonySessionId>,
    ) -> Self {
        Self {
            case_type,
            work_group_id: work_group_id.into(),
            contact_method: ContactMethod::Telephony,
            telephony_session_id,
        }
    }
}

/// Queue partition a case (and the agent capacity serving it) belongs to
///
/// Interactive cases have a customer waiting on a live line and are always
/// served before passive ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentClass {
    Interactive,
    Passive,
}

impl AssignmentClass {
    /// Classify a case given its telephony session, if it has one
    pub fn of(case: &Case, telephony_session: Option<&TelephonySession>) -> Self {
        let live_call = telephony_session.map_or(false, |session| session.is_active());
        if case.contact_method == ContactMethod::Telephony && live_call {
            AssignmentClass::Interactive
        } else {
            AssignmentClass::Passive
        }
    }
}

impl fmt::Display for AssignmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentClass::Interactive => write!(f, "interactive"),
            AssignmentClass::Passive => write!(f, "passive"),
        }
    }
}
