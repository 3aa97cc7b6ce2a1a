//! Ingestion of provider channel events

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::AgentSessionManager;
use crate::context::EngineContext;
use crate::error::{CaseEngineError, Result};
use crate::events::{BroadcastMessage, EventOutbox};
use crate::types::{ChannelId, TelephonySessionId};

use super::state::DerivedTelephonyState;
use super::types::{ChannelEvent, ChannelEventKind, TelephonySession};

/// Appends provider events to telephony sessions
///
/// Appends are serialized per telephony session. A session ends when its last
/// active channel hangs up. Agents whose call no longer involves them get the
/// telephony session removed from their log entry.
pub struct TelephonySessionRecorder {
    ctx: EngineContext,
    sessions: Arc<AgentSessionManager>,
}

impl TelephonySessionRecorder {
    pub fn new(ctx: EngineContext, sessions: Arc<AgentSessionManager>) -> Self {
        Self { ctx, sessions }
    }

    pub async fn open_session(&self, provider_reference: Option<String>) -> Result<TelephonySession> {
        let session = TelephonySession::new(provider_reference, self.ctx.now());

        let mut tx = self.ctx.begin().await?;
        tx.insert_telephony_session(&session).await?;
        let mut outbox = EventOutbox::new();
        outbox.broadcast(BroadcastMessage::telephony_session_changed(session.id));
        self.ctx.commit(tx, outbox, Vec::new()).await?;

        info!(
            "📞 Opened telephony session {} (provider reference: {:?})",
            session.id, session.provider_reference
        );
        Ok(session)
    }

    pub async fn find_by_provider_reference(&self, provider_reference: &str) -> Result<Option<TelephonySession>> {
        let mut tx = self.ctx.begin().await?;
        tx.find_telephony_session_by_provider_reference(provider_reference)
            .await
    }

    /// Append one channel event and return the resulting call state
    pub async fn record_channel_event(
        &self,
        telephony_session_id: TelephonySessionId,
        channel_id: impl Into<ChannelId>,
        kind: ChannelEventKind,
    ) -> Result<DerivedTelephonyState> {
        let channel_id = channel_id.into();
        let guard = self.ctx.locks.lock_telephony_session(telephony_session_id).await;
        let mut tx = self.ctx.begin().await?;
        let now = self.ctx.now();

        let mut session = tx
            .find_telephony_session(telephony_session_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Telephony session {}", telephony_session_id)))?;
        if !session.is_active() {
            return Err(CaseEngineError::invalid_state(format!(
                "Telephony session {} has ended",
                telephony_session_id
            )));
        }

        let hung_up = matches!(kind, ChannelEventKind::HungUp { .. });
        let event = ChannelEvent {
            sequence: session.next_sequence(),
            channel_id,
            occurred_at: now,
            kind,
        };
        tx.append_channel_event(telephony_session_id, &event).await?;
        debug!(
            "📞 Telephony session {} event #{} on channel {}",
            telephony_session_id, event.sequence, event.channel_id
        );
        session.events.push(event);

        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        let mut outbox = EventOutbox::new();
        outbox.broadcast(BroadcastMessage::telephony_session_changed(telephony_session_id));

        if hung_up && state.active_channel_count() == 0 {
            session.ended_at = Some(now);
            tx.update_telephony_session(&session).await?;
            for case in tx.find_cases_by_telephony_session(telephony_session_id).await? {
                outbox.broadcast(BroadcastMessage::case_changed(case.id));
            }
            info!("📴 Telephony session {} ended", telephony_session_id);
        }

        self.ctx.commit(tx, outbox, vec![guard]).await?;
        self.detach_idle_agents(telephony_session_id, &state).await;

        Ok(state)
    }

    /// The agent handed the call over and leaves it
    pub async fn mark_forwarded(&self, telephony_session_id: TelephonySessionId) -> Result<DerivedTelephonyState> {
        let guard = self.ctx.locks.lock_telephony_session(telephony_session_id).await;
        let mut tx = self.ctx.begin().await?;

        let mut session = tx
            .find_telephony_session(telephony_session_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Telephony session {}", telephony_session_id)))?;
        session.forwarded = true;
        tx.update_telephony_session(&session).await?;

        let mut outbox = EventOutbox::new();
        outbox.broadcast(BroadcastMessage::telephony_session_changed(telephony_session_id));
        self.ctx.commit(tx, outbox, vec![guard]).await?;

        info!("↪️ Telephony session {} forwarded", telephony_session_id);
        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        self.detach_idle_agents(telephony_session_id, &state).await;
        Ok(state)
    }

    pub async fn current_state(&self, telephony_session_id: TelephonySessionId) -> Result<DerivedTelephonyState> {
        let mut tx = self.ctx.begin().await?;
        let session = tx
            .find_telephony_session(telephony_session_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Telephony session {}", telephony_session_id)))?;
        Ok(DerivedTelephonyState::create_from_telephony_session(&session))
    }

    async fn detach_idle_agents(&self, telephony_session_id: TelephonySessionId, state: &DerivedTelephonyState) {
        if state.agent_participates_in_call() {
            return;
        }

        let attached = match self
            .sessions
            .find_active_sessions_by_telephony_session(telephony_session_id)
            .await
        {
            Ok(attached) => attached,
            Err(e) => {
                warn!(
                    "⚠️ Could not look up agents on telephony session {}: {}",
                    telephony_session_id, e
                );
                return;
            }
        };

        for session in attached {
            if let Err(e) = self
                .sessions
                .detach_telephony_session(session.id, telephony_session_id)
                .await
            {
                warn!(
                    "⚠️ Failed to detach telephony session {} from agent session {}: {}",
                    telephony_session_id, session.id, e
                );
            }
        }
    }
}
