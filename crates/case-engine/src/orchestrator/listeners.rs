//! Domain event listeners wiring the managers together

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::context::EngineContext;
use crate::error::{CaseEngineError, Result};
use crate::events::{DomainEvent, DomainEventListener};
use crate::queue::CaseQueueManager;
use crate::routing::{CaseAssignmentMatcher, MatchingPassRunner};
use crate::telephony::TelephonyCommandService;
use crate::types::{CaseId, ContactMethod};

/// Keeps the queue in line with the case lifecycle
///
/// Created and unassigned cases are enqueued when they are open, unassigned,
/// not queued and not scheduled. Closed cases are taken off the queue.
pub struct CaseLifecycleListener {
    ctx: EngineContext,
    queue: Arc<CaseQueueManager>,
}

impl CaseLifecycleListener {
    pub fn new(ctx: EngineContext, queue: Arc<CaseQueueManager>) -> Self {
        Self { ctx, queue }
    }

    async fn enqueue_if_waiting(&self, case_id: CaseId) -> Result<()> {
        let waiting = {
            let mut tx = self.ctx.begin().await?;
            match tx.find_case(case_id).await? {
                Some(case) if case.is_unassigned_open() => {
                    tx.find_active_queue_entry(case_id).await?.is_none()
                        && tx.find_active_schedule_entry(case_id).await?.is_none()
                }
                _ => false,
            }
        };
        if !waiting {
            return Ok(());
        }

        match self.queue.enqueue(case_id).await {
            Ok(_) => Ok(()),
            Err(CaseEngineError::InvalidState(reason)) => {
                debug!("Case {} no longer waiting: {}", case_id, reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DomainEventListener for CaseLifecycleListener {
    fn name(&self) -> &str {
        "case-lifecycle"
    }

    async fn on_event(&self, event: &DomainEvent) -> Result<()> {
        match event {
            DomainEvent::CaseCreated { case_id } | DomainEvent::CaseWasUnassigned { case_id, .. } => {
                self.enqueue_if_waiting(*case_id).await
            }
            DomainEvent::CaseClosed { case_id } => {
                if self.queue.is_queued(*case_id).await? {
                    self.queue.dequeue_by_case(*case_id).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Starts a matching pass after events that may produce new pairs
pub enum MatchingTrigger {
    Inline(Arc<CaseAssignmentMatcher>),
    Background(Arc<MatchingPassRunner>),
}

#[async_trait]
impl DomainEventListener for MatchingTrigger {
    fn name(&self) -> &str {
        "matching-trigger"
    }

    async fn on_event(&self, event: &DomainEvent) -> Result<()> {
        if !event.triggers_matching_pass() {
            return Ok(());
        }

        match self {
            MatchingTrigger::Inline(matcher) => {
                matcher.assign_cases_to_agents().await?;
            }
            MatchingTrigger::Background(runner) => runner.request(),
        }
        Ok(())
    }
}

/// Connects the customer's call to the agent a telephony case was assigned to
pub struct AgentConnectListener {
    ctx: EngineContext,
    telephony: Arc<TelephonyCommandService>,
}

impl AgentConnectListener {
    pub fn new(ctx: EngineContext, telephony: Arc<TelephonyCommandService>) -> Self {
        Self { ctx, telephony }
    }
}

#[async_trait]
impl DomainEventListener for AgentConnectListener {
    fn name(&self) -> &str {
        "agent-connect"
    }

    async fn on_event(&self, event: &DomainEvent) -> Result<()> {
        let DomainEvent::CaseAgentAssigned {
            case_id,
            agent_session_id,
        } = event
        else {
            return Ok(());
        };

        let live_call = {
            let mut tx = self.ctx.begin().await?;
            match tx.find_case(*case_id).await? {
                Some(case) if case.contact_method == ContactMethod::Telephony => match case.telephony_session_id {
                    Some(telephony_session_id) => tx
                        .find_telephony_session(telephony_session_id)
                        .await?
                        .map_or(false, |session| session.is_active()),
                    None => false,
                },
                _ => false,
            }
        };
        if !live_call {
            return Ok(());
        }

        match self.telephony.connect_case_to_agent(*case_id, *agent_session_id).await {
            Ok(channel_id) => {
                debug!(
                    "☎️ Connected channel {} of case {} to agent session {}",
                    channel_id, case_id, agent_session_id
                );
                Ok(())
            }
            Err(CaseEngineError::InvalidState(reason)) => {
                warn!("⚠️ Could not connect case {} to its agent: {}", case_id, reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
