//! # Domain Events
//!
//! Domain events announce committed state changes inside the engine. They are
//! collected in an [`EventOutbox`] while a unit of work is open and only handed
//! to the [`EventDispatcher`] after the unit of work commits. An outbox that is
//! dropped without being flushed discards its events, so listeners never react
//! to state that was rolled back.
//!
//! Broadcasts ([`BroadcastMessage`]) are the external real-time contract and
//! follow the same post-commit rule.

pub mod broadcast;
pub mod dispatcher;
pub mod outbox;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{AgentSessionId, CaseId, TelephonySessionId};

pub use broadcast::{BroadcastMessage, Broadcaster, ChannelBroadcaster, NoopBroadcaster};
pub use dispatcher::EventDispatcher;
pub use outbox::EventOutbox;

/// A committed state change inside the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    CaseCreated {
        case_id: CaseId,
    },
    CaseClosed {
        case_id: CaseId,
    },
    CaseWasUnassigned {
        case_id: CaseId,
        telephony_session_id: Option<TelephonySessionId>,
    },
    CaseAgentAssigned {
        case_id: CaseId,
        agent_session_id: AgentSessionId,
    },
    AgentSessionStarted {
        agent_session_id: AgentSessionId,
    },
    CaseOnQueue,
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::CaseCreated { .. } => "case_created",
            DomainEvent::CaseClosed { .. } => "case_closed",
            DomainEvent::CaseWasUnassigned { .. } => "case_was_unassigned",
            DomainEvent::CaseAgentAssigned { .. } => "case_agent_assigned",
            DomainEvent::AgentSessionStarted { .. } => "agent_session_started",
            DomainEvent::CaseOnQueue => "case_on_queue",
        }
    }

    /// Events after which a matching pass may find new pairs
    pub fn triggers_matching_pass(&self) -> bool {
        matches!(
            self,
            DomainEvent::CaseOnQueue
                | DomainEvent::CaseClosed { .. }
                | DomainEvent::CaseWasUnassigned { .. }
                | DomainEvent::AgentSessionStarted { .. }
        )
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainEvent::CaseCreated { case_id }
            | DomainEvent::CaseClosed { case_id }
            | DomainEvent::CaseWasUnassigned { case_id, .. } => write!(f, "{}({})", self.name(), case_id),
            DomainEvent::CaseAgentAssigned {
                case_id,
                agent_session_id,
            } => write!(f, "{}({} -> {})", self.name(), case_id, agent_session_id),
            DomainEvent::AgentSessionStarted { agent_session_id } => {
                write!(f, "{}({})", self.name(), agent_session_id)
            }
            DomainEvent::CaseOnQueue => write!(f, "{}", self.name()),
        }
    }
}

/// Receives domain events after the producing unit of work committed
#[async_trait]
pub trait DomainEventListener: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &DomainEvent) -> Result<()>;
}

/// Post-commit delivery target shared by all managers
#[derive(Clone)]
pub struct EventBus {
    dispatcher: Arc<EventDispatcher>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl EventBus {
    pub fn new(dispatcher: Arc<EventDispatcher>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            dispatcher,
            broadcaster,
        }
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn broadcaster(&self) -> &Arc<dyn Broadcaster> {
        &self.broadcaster
    }
}
