//! Logout sweep for agent sessions nobody has touched for too long

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::{CaseEngineError, Result};
use crate::types::{AgentId, AgentSessionId};

use super::manager::AgentSessionManager;

/// A session the sweep could not end
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    pub agent_session_id: AgentSessionId,
    pub agent_id: AgentId,
    pub error: String,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub ended: Vec<AgentSessionId>,
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Run `end` for every candidate, recording failures instead of stopping
pub(crate) async fn sweep_each<F, Fut>(candidates: Vec<(AgentSessionId, AgentId)>, mut end: F) -> SweepReport
where
    F: FnMut(AgentSessionId) -> Fut,
    Fut: Future<Output = std::result::Result<(), CaseEngineError>>,
{
    let mut report = SweepReport::default();

    for (agent_session_id, agent_id) in candidates {
        match end(agent_session_id).await {
            Ok(()) => report.ended.push(agent_session_id),
            Err(e) => {
                error!(
                    "❌ Failed to log out inactive agent session {} of agent {}: {}",
                    agent_session_id, agent_id, e
                );
                report.failed.push(SweepFailure {
                    agent_session_id,
                    agent_id,
                    error: e.to_string(),
                });
            }
        }
    }

    report
}

/// Force-ends sessions whose last log transition is older than the session
/// lifetime
pub struct InactivitySweeper {
    sessions: Arc<AgentSessionManager>,
    clock: Arc<dyn Clock>,
    session_lifetime: Duration,
}

impl InactivitySweeper {
    pub fn new(sessions: Arc<AgentSessionManager>, clock: Arc<dyn Clock>, session_lifetime: Duration) -> Self {
        Self {
            sessions,
            clock,
            session_lifetime,
        }
    }

    /// End every inactive session, isolating per-session failures
    ///
    /// Failed sessions are picked up again by the next sweep.
    pub async fn logout_inactive_sessions(&self) -> Result<SweepReport> {
        let cutoff = self.clock.now() - self.session_lifetime;
        let candidates: Vec<(AgentSessionId, AgentId)> = self
            .sessions
            .inactive_sessions(cutoff)
            .await?
            .into_iter()
            .map(|session| (session.id, session.agent_id))
            .collect();

        if candidates.is_empty() {
            return Ok(SweepReport::default());
        }

        info!("🧹 Logging out {} inactive agent session(s) (inactive since {})", candidates.len(), cutoff);

        let sessions = &self.sessions;
        let report = sweep_each(candidates, |agent_session_id| async move {
            sessions.force_end_session(agent_session_id).await
        })
        .await;

        info!(
            "🧹 Inactivity sweep finished: {} ended, {} failed",
            report.ended.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_batch() {
        let broken = AgentSessionId::new();
        let healthy_a = AgentSessionId::new();
        let healthy_b = AgentSessionId::new();
        let candidates = vec![
            (healthy_a, AgentId::from("a")),
            (broken, AgentId::from("broken")),
            (healthy_b, AgentId::from("b")),
        ];

        let report = sweep_each(candidates, |id| async move {
            if id == broken {
                Err(CaseEngineError::database("disk I/O error"))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(report.ended, vec![healthy_a, healthy_b]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].agent_session_id, broken);
        assert_eq!(report.failed[0].agent_id, AgentId::from("broken"));
        assert!(report.failed[0].error.contains("disk I/O error"));
        assert!(!report.is_clean());
    }
}
