//! Case to agent matching pass

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::agent::manager::apply_log_entry;
use crate::agent::{AgentSession, AgentSessionManager, AgentSessionStatus};
use crate::context::EngineContext;
use crate::error::Result;
use crate::events::{BroadcastMessage, EventOutbox};
use crate::queue::manager::classify;
use crate::queue::{CaseQueueManager, QueuedCase};
use crate::types::{AgentId, AgentSessionId, AssignmentClass, CaseId};

/// One committed assignment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub case_id: CaseId,
    pub agent_session_id: AgentSessionId,
    pub agent_id: AgentId,
    pub class: AssignmentClass,
}

/// Result of re-validating a pair under its locks
#[derive(Debug)]
pub enum MatchOutcome {
    Assigned(Assignment),
    /// No longer queued, no longer open or no longer of the expected class
    CaseUnavailable,
    /// Ended or no longer available for the class
    SessionUnavailable,
}

/// Outcome of one matching pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchingReport {
    pub assignments: Vec<Assignment>,
    /// Pairs dropped because re-validation failed
    pub skipped: usize,
    /// Pairs dropped because of an error
    pub failed: usize,
}

impl MatchingReport {
    pub fn assigned_count(&self, class: AssignmentClass) -> usize {
        self.assignments.iter().filter(|a| a.class == class).count()
    }
}

/// Matches queued cases to available agent sessions
///
/// A pass walks the interactive queue first and the passive queue second.
/// Within a class it is greedy: each case, oldest first, gets the
/// highest-priority available session serving its work group. Every pair is
/// re-validated under the case lock and then the session lock, so passes may
/// run redundantly and concurrently.
pub struct CaseAssignmentMatcher {
    ctx: EngineContext,
    queue: Arc<CaseQueueManager>,
    sessions: Arc<AgentSessionManager>,
}

impl CaseAssignmentMatcher {
    pub fn new(ctx: EngineContext, queue: Arc<CaseQueueManager>, sessions: Arc<AgentSessionManager>) -> Self {
        Self { ctx, queue, sessions }
    }

    /// Run one full matching pass
    pub async fn assign_cases_to_agents(&self) -> Result<MatchingReport> {
        let mut report = MatchingReport::default();

        for class in [AssignmentClass::Interactive, AssignmentClass::Passive] {
            let cases = self.queue.get_assignable_cases(class).await?;
            if cases.is_empty() {
                continue;
            }
            let sessions = self.sessions.available_sessions(class).await?;
            if sessions.is_empty() {
                debug!("No agent sessions available for {} cases", class);
                continue;
            }

            debug!(
                "🎯 Matching {} {} case(s) against {} agent session(s)",
                cases.len(),
                class,
                sessions.len()
            );
            self.match_class(class, cases, sessions, &mut report).await;
        }

        if !report.assignments.is_empty() {
            info!(
                "🎯 Matching pass assigned {} case(s) ({} interactive, {} passive)",
                report.assignments.len(),
                report.assigned_count(AssignmentClass::Interactive),
                report.assigned_count(AssignmentClass::Passive)
            );
        }
        Ok(report)
    }

    async fn match_class(
        &self,
        class: AssignmentClass,
        cases: Vec<QueuedCase>,
        sessions: Vec<AgentSession>,
        report: &mut MatchingReport,
    ) {
        let mut taken: HashSet<AgentSessionId> = HashSet::new();

        for queued in cases {
            if taken.len() == sessions.len() {
                break;
            }

            let candidates: Vec<AgentSessionId> = sessions
                .iter()
                .filter(|session| !taken.contains(&session.id))
                .filter(|session| session.serves_work_group(&queued.entry.work_group_id))
                .map(|session| session.id)
                .collect();

            for agent_session_id in candidates {
                match self.try_match(queued.case_id(), agent_session_id, class).await {
                    Ok(MatchOutcome::Assigned(assignment)) => {
                        taken.insert(agent_session_id);
                        report.assignments.push(assignment);
                        break;
                    }
                    Ok(MatchOutcome::CaseUnavailable) => {
                        report.skipped += 1;
                        break;
                    }
                    Ok(MatchOutcome::SessionUnavailable) => {
                        report.skipped += 1;
                        taken.insert(agent_session_id);
                    }
                    Err(e) => {
                        error!(
                            "❌ Failed to assign case {} to agent session {}: {}",
                            queued.case_id(),
                            agent_session_id,
                            e
                        );
                        report.failed += 1;
                        break;
                    }
                }
            }
        }
    }

    /// Re-validate and commit one pair under the case and session locks
    pub async fn try_match(
        &self,
        case_id: CaseId,
        agent_session_id: AgentSessionId,
        class: AssignmentClass,
    ) -> Result<MatchOutcome> {
        let case_guard = self.ctx.locks.lock_case(case_id).await;
        let session_guard = self.ctx.locks.lock_agent_session(agent_session_id).await;
        let mut tx = self.ctx.begin().await?;
        let now = self.ctx.now();

        let Some(entry) = tx.find_active_queue_entry(case_id).await? else {
            debug!("Case {} left the queue before it could be assigned", case_id);
            return Ok(MatchOutcome::CaseUnavailable);
        };
        let Some(mut case) = tx.find_case(case_id).await? else {
            return Ok(MatchOutcome::CaseUnavailable);
        };
        if !entry.automatically_assign || !case.is_unassigned_open() || classify(tx.as_mut(), &case).await? != class {
            return Ok(MatchOutcome::CaseUnavailable);
        }

        let Some(mut session) = tx.find_agent_session(agent_session_id).await? else {
            return Ok(MatchOutcome::SessionUnavailable);
        };
        if !session.is_available_for(class) || !session.serves_work_group(&case.work_group_id) {
            debug!("Agent session {} is no longer available for case {}", agent_session_id, case_id);
            return Ok(MatchOutcome::SessionUnavailable);
        }

        let mut outbox = EventOutbox::new();
        tx.tombstone_queue_entry(entry.id, now).await?;
        outbox.broadcast(BroadcastMessage::queue_changed());

        case.assign_to(session.agent_id.clone());
        tx.update_case(&case).await?;
        outbox.broadcast(BroadcastMessage::case_changed(case_id));

        // Only a live call ties the agent to its telephony session
        let telephony_session_id = match class {
            AssignmentClass::Interactive => case.telephony_session_id,
            AssignmentClass::Passive => None,
        };
        apply_log_entry(
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
            "✅ Assigned {} case {} to agent {} (session {})",
            class, case_id, session.agent_id, agent_session_id
        );
        Ok(MatchOutcome::Assigned(Assignment {
            case_id,
            agent_session_id,
            agent_id: session.agent_id,
            class,
        }))
    }
}
