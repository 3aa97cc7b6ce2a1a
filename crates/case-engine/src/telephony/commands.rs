//! Outbound call control
//!
//! Every command re-derives the telephony state immediately before it is
//! issued, so channel lookups always see the latest event log.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::context::EngineContext;
use crate::error::{CaseEngineError, Result};
use crate::types::{AgentSessionId, CaseId, ChannelId, InternalPhoneId, TelephonySessionId};

use super::state::{DerivedChannelState, DerivedTelephonyState};

/// Command surface of the telephony provider
#[async_trait]
pub trait TelephonyCommandDispatcher: Send + Sync {
    /// Bridge a channel to the agent's internal phone
    async fn connect_to_agent(
        &self,
        telephony_session_id: TelephonySessionId,
        channel: &DerivedChannelState,
        internal_phone_id: &InternalPhoneId,
    ) -> Result<()>;

    async fn hold(&self, telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()>;

    async fn resume(&self, telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()>;

    async fn hangup(&self, telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()>;

    /// Move the agent's audio to `channel`, holding the others
    async fn switch_to(&self, telephony_session_id: TelephonySessionId, channel: &DerivedChannelState)
        -> Result<()>;
}

/// Provider that only logs the commands it receives
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCommandDispatcher;

#[async_trait]
impl TelephonyCommandDispatcher for TracingCommandDispatcher {
    async fn connect_to_agent(
        &self,
        telephony_session_id: TelephonySessionId,
        channel: &DerivedChannelState,
        internal_phone_id: &InternalPhoneId,
    ) -> Result<()> {
        info!(
            "☎️ connect channel {} of telephony session {} to phone {}",
            channel.channel_id, telephony_session_id, internal_phone_id
        );
        Ok(())
    }

    async fn hold(&self, telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()> {
        info!("⏸️ hold channel {} of telephony session {}", channel.channel_id, telephony_session_id);
        Ok(())
    }

    async fn resume(&self, telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()> {
        info!("▶️ resume channel {} of telephony session {}", channel.channel_id, telephony_session_id);
        Ok(())
    }

    async fn hangup(&self, telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()> {
        info!("📴 hang up channel {} of telephony session {}", channel.channel_id, telephony_session_id);
        Ok(())
    }

    async fn switch_to(
        &self,
        telephony_session_id: TelephonySessionId,
        channel: &DerivedChannelState,
    ) -> Result<()> {
        info!("🔀 switch to channel {} of telephony session {}", channel.channel_id, telephony_session_id);
        Ok(())
    }
}

/// Resolves channels from the current call state and issues provider commands
pub struct TelephonyCommandService {
    ctx: EngineContext,
    dispatcher: Arc<dyn TelephonyCommandDispatcher>,
}

impl TelephonyCommandService {
    pub fn new(ctx: EngineContext, dispatcher: Arc<dyn TelephonyCommandDispatcher>) -> Self {
        Self { ctx, dispatcher }
    }

    /// Fresh snapshot of the call
    pub async fn current_state(&self, telephony_session_id: TelephonySessionId) -> Result<DerivedTelephonyState> {
        let mut tx = self.ctx.begin().await?;
        let session = tx
            .find_telephony_session(telephony_session_id)
            .await?
            .ok_or_else(|| CaseEngineError::not_found(format!("Telephony session {}", telephony_session_id)))?;
        Ok(DerivedTelephonyState::create_from_telephony_session(&session))
    }

    /// Connect the customer's channel of a case's call to the assigned agent
    pub async fn connect_case_to_agent(&self, case_id: CaseId, agent_session_id: AgentSessionId) -> Result<ChannelId> {
        let (case, session) = {
            let mut tx = self.ctx.begin().await?;
            let case = tx
                .find_case(case_id)
                .await?
                .ok_or_else(|| CaseEngineError::not_found(format!("Case {}", case_id)))?;
            let session = tx
                .find_agent_session(agent_session_id)
                .await?
                .ok_or_else(|| CaseEngineError::not_found(format!("Agent session {}", agent_session_id)))?;
            (case, session)
        };

        let telephony_session_id = case
            .telephony_session_id
            .ok_or_else(|| CaseEngineError::invalid_state(format!("Case {} has no telephony session", case_id)))?;

        let state = self.current_state(telephony_session_id).await?;
        let channel = state.customer_channel().ok_or_else(|| {
            CaseEngineError::invalid_state(format!(
                "Telephony session {} has no active channel",
                telephony_session_id
            ))
        })?;

        self.dispatcher
            .connect_to_agent(telephony_session_id, channel, &session.internal_phone_id)
            .await?;
        Ok(channel.channel_id.clone())
    }

    pub async fn hangup_channel(&self, telephony_session_id: TelephonySessionId, channel_id: &str) -> Result<()> {
        let state = self.current_state(telephony_session_id).await?;
        let channel = state.get_channel(channel_id)?;
        self.dispatcher.hangup(telephony_session_id, channel).await
    }

    pub async fn hangup_channel_by_reference(
        &self,
        telephony_session_id: TelephonySessionId,
        reference: &str,
    ) -> Result<()> {
        let state = self.current_state(telephony_session_id).await?;
        let channel = state.get_channel_by_reference(reference)?;
        self.dispatcher.hangup(telephony_session_id, channel).await
    }

    pub async fn hold_channel(&self, telephony_session_id: TelephonySessionId, channel_id: &str) -> Result<()> {
        let state = self.current_state(telephony_session_id).await?;
        let channel = state.get_channel(channel_id)?;
        self.dispatcher.hold(telephony_session_id, channel).await
    }

    pub async fn resume_channel(&self, telephony_session_id: TelephonySessionId, channel_id: &str) -> Result<()> {
        let state = self.current_state(telephony_session_id).await?;
        let channel = state.get_channel(channel_id)?;
        self.dispatcher.resume(telephony_session_id, channel).await
    }

    pub async fn switch_to_channel(&self, telephony_session_id: TelephonySessionId, channel_id: &str) -> Result<()> {
        let state = self.current_state(telephony_session_id).await?;
        let channel = state.get_channel(channel_id)?;
        self.dispatcher.switch_to(telephony_session_id, channel).await
    }
}
