//! # Derived Telephony State
//!
//! Reconstructs "what is happening on this call right now" from a telephony
//! session's channel event log. The derivation is a pure fold: it is computed on
//! every read, never cached and never persisted, so it always reflects the
//! latest stored event.
//!
//! ## Channel state machine
//!
//! ```text
//!  Created ──► CONNECTING ──StateSwitched──► RINGING ──StateSwitched──► ANSWERED
//!                  │                            │                          │
//!                  └────────────── HungUp (leaves the active set) ─────────┘
//! ```
//!
//! There is no explicit "ended" state: a channel that is not in the active set
//! is inactive.
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use sc_case_engine::telephony::{
//!     ChannelEventKind, ChannelMetadata, ChannelState, DerivedTelephonyState, TelephonySession,
//! };
//! use sc_case_engine::types::ChannelId;
//!
//! let mut session = TelephonySession::new(None, Utc::now());
//! for kind in [
//!     ChannelEventKind::Created { metadata: ChannelMetadata::inbound(1, "+4930100", "+4930200") },
//!     ChannelEventKind::StateSwitched { state: ChannelState::Ringing },
//!     ChannelEventKind::StateSwitched { state: ChannelState::Answered },
//! ] {
//!     session.events.push(sc_case_engine::telephony::ChannelEvent {
//!         sequence: session.next_sequence(),
//!         channel_id: ChannelId::from("ch1"),
//!         occurred_at: Utc::now(),
//!         kind,
//!     });
//! }
//!
//! let state = DerivedTelephonyState::create_from_telephony_session(&session);
//! assert_eq!(state.get_channel("ch1").unwrap().state, ChannelState::Answered);
//! assert!(state.get_channel("missing").is_err());
//! ```

use serde::Serialize;
use tracing::debug;

use crate::error::{CaseEngineError, ChannelLookup, Result};
use crate::types::{ChannelId, TelephonySessionId};

use super::types::{CallDirection, ChannelEvent, ChannelEventKind, ChannelState, TelephonySession};

/// Point-in-time view of one active channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedChannelState {
    pub channel_id: ChannelId,
    pub line_number: u32,
    pub reference: Option<String>,
    pub local_number: String,
    pub remote_number: String,
    pub direction: CallDirection,
    pub state: ChannelState,
    pub audio_connected_to_agent: bool,
    pub company_id: Option<i64>,
}

/// Point-in-time view of a whole telephony session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedTelephonyState {
    telephony_session_id: TelephonySessionId,
    /// Active channels in creation order
    channels: Vec<DerivedChannelState>,
    forwarded: bool,
    agent_answered: bool,
}

impl DerivedTelephonyState {
    /// Fold the session's event log into a fresh snapshot
    pub fn create_from_telephony_session(session: &TelephonySession) -> Self {
        let mut events: Vec<&ChannelEvent> = session.events.iter().collect();
        events.sort_by_key(|event| event.sequence);

        let mut channels: Vec<DerivedChannelState> = Vec::new();
        let mut agent_answered = false;

        for event in events {
            apply_event(&mut channels, event);

            if channels
                .iter()
                .any(|channel| channel.state == ChannelState::Answered && channel.audio_connected_to_agent)
            {
                agent_answered = true;
            }
        }

        Self {
            telephony_session_id: session.id,
            channels,
            forwarded: session.forwarded,
            agent_answered,
        }
    }

    pub fn telephony_session_id(&self) -> TelephonySessionId {
        self.telephony_session_id
    }

    pub fn channels(&self) -> &[DerivedChannelState] {
        &self.channels
    }

    pub fn active_channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Every active channel is disconnected from the agent's audio
    pub fn is_on_hold(&self) -> bool {
        self.channels.iter().all(|channel| !channel.audio_connected_to_agent)
    }

    pub fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    /// Some channel was answered with the agent's audio attached at least once
    pub fn agent_answered(&self) -> bool {
        self.agent_answered
    }

    pub fn agent_participates_in_call(&self) -> bool {
        self.active_channel_count() > 0 && !self.forwarded
    }

    pub fn get_channel(&self, channel_id: &str) -> Result<&DerivedChannelState> {
        self.channels
            .iter()
            .find(|channel| channel.channel_id.as_ref() == channel_id)
            .ok_or_else(|| CaseEngineError::NoSuchChannel(ChannelLookup::Id(channel_id.to_string())))
    }

    pub fn get_channel_by_reference(&self, reference: &str) -> Result<&DerivedChannelState> {
        self.channels
            .iter()
            .find(|channel| channel.reference.as_deref() == Some(reference))
            .ok_or_else(|| CaseEngineError::NoSuchChannel(ChannelLookup::Reference(reference.to_string())))
    }

    /// The channel an agent should be connected to: the first active channel
    /// without agent audio, falling back to the first active channel
    pub fn customer_channel(&self) -> Option<&DerivedChannelState> {
        self.channels
            .iter()
            .find(|channel| !channel.audio_connected_to_agent)
            .or_else(|| self.channels.first())
    }
}

fn apply_event(channels: &mut Vec<DerivedChannelState>, event: &ChannelEvent) {
    match &event.kind {
        ChannelEventKind::Created { metadata } => {
            if channels.iter().any(|channel| channel.channel_id == event.channel_id) {
                debug!("Ignoring duplicate create for active channel {}", event.channel_id);
                return;
            }
            channels.push(DerivedChannelState {
                channel_id: event.channel_id.clone(),
                line_number: metadata.line_number,
                reference: metadata.reference.clone(),
                local_number: metadata.local_number.clone(),
                remote_number: metadata.remote_number.clone(),
                direction: metadata.direction,
                state: ChannelState::Connecting,
                audio_connected_to_agent: false,
                company_id: metadata.company_id,
            });
        }
        ChannelEventKind::StateSwitched { state } => match find_channel(channels, &event.channel_id) {
            Some(channel) => channel.state = *state,
            None => debug!("State switch for unknown channel {}", event.channel_id),
        },
        ChannelEventKind::AudioConnectionChanged { connected_to_agent } => {
            match find_channel(channels, &event.channel_id) {
                Some(channel) => channel.audio_connected_to_agent = *connected_to_agent,
                None => debug!("Audio change for unknown channel {}", event.channel_id),
            }
        }
        ChannelEventKind::HungUp { .. } => {
            channels.retain(|channel| channel.channel_id != event.channel_id);
        }
    }
}

fn find_channel<'a>(
    channels: &'a mut [DerivedChannelState],
    channel_id: &ChannelId,
) -> Option<&'a mut DerivedChannelState> {
    channels.iter_mut().find(|channel| &channel.channel_id == channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telephony::ChannelMetadata;
    use chrono::Utc;

    fn push(session: &mut TelephonySession, channel: &str, kind: ChannelEventKind) {
        let sequence = session.next_sequence();
        session.events.push(ChannelEvent {
            sequence,
            channel_id: ChannelId::from(channel),
            occurred_at: Utc::now(),
            kind,
        });
    }

    fn created(line: u32) -> ChannelEventKind {
        ChannelEventKind::Created {
            metadata: ChannelMetadata::inbound(line, "+4930100", "+4930999"),
        }
    }

    fn switched(state: ChannelState) -> ChannelEventKind {
        ChannelEventKind::StateSwitched { state }
    }

    fn audio(connected_to_agent: bool) -> ChannelEventKind {
        ChannelEventKind::AudioConnectionChanged { connected_to_agent }
    }

    #[test]
    fn test_channel_progresses_to_answered() {
        let mut session = TelephonySession::new(None, Utc::now());
        push(&mut session, "ch1", created(1));
        push(&mut session, "ch1", switched(ChannelState::Ringing));
        push(&mut session, "ch1", switched(ChannelState::Answered));

        let state = DerivedTelephonyState::create_from_telephony_session(&session);

        assert_eq!(state.active_channel_count(), 1);
        assert_eq!(state.get_channel("ch1").unwrap().state, ChannelState::Answered);
        match state.get_channel("missing") {
            Err(CaseEngineError::NoSuchChannel(ChannelLookup::Id(id))) => assert_eq!(id, "missing"),
            other => panic!("Expected NoSuchChannel by id, got {:?}", other),
        }
    }

    #[test]
    fn test_new_channel_starts_connecting() {
        let mut session = TelephonySession::new(None, Utc::now());
        push(&mut session, "ch1", created(1));

        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        let channel = state.get_channel("ch1").unwrap();

        assert_eq!(channel.state, ChannelState::Connecting);
        assert!(!channel.audio_connected_to_agent);
        assert_eq!(channel.line_number, 1);
    }

    #[test]
    fn test_hangup_removes_channel_from_active_set() {
        let mut session = TelephonySession::new(None, Utc::now());
        push(&mut session, "ch1", created(1));
        push(&mut session, "ch2", created(2));
        push(&mut session, "ch1", ChannelEventKind::HungUp { cause: None });

        let state = DerivedTelephonyState::create_from_telephony_session(&session);

        assert_eq!(state.active_channel_count(), 1);
        assert!(state.get_channel("ch1").is_err());
        assert_eq!(state.channels()[0].channel_id, ChannelId::from("ch2"));
    }

    #[test]
    fn test_lookup_by_reference_reports_reference() {
        let mut session = TelephonySession::new(None, Utc::now());
        push(
            &mut session,
            "ch1",
            ChannelEventKind::Created {
                metadata: ChannelMetadata::outbound(1, "+4930100", "+4930555").with_reference("consult"),
            },
        );

        let state = DerivedTelephonyState::create_from_telephony_session(&session);

        assert_eq!(state.get_channel_by_reference("consult").unwrap().channel_id, ChannelId::from("ch1"));
        match state.get_channel_by_reference("transfer") {
            Err(CaseEngineError::NoSuchChannel(ChannelLookup::Reference(reference))) => {
                assert_eq!(reference, "transfer")
            }
            other => panic!("Expected NoSuchChannel by reference, got {:?}", other),
        }
    }

    #[test]
    fn test_on_hold_when_no_channel_has_agent_audio() {
        let mut session = TelephonySession::new(None, Utc::now());
        push(&mut session, "ch1", created(1));
        push(&mut session, "ch2", created(2));
        push(&mut session, "ch1", audio(true));

        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert!(!state.is_on_hold());

        push(&mut session, "ch1", audio(false));
        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert!(state.is_on_hold());
    }

    #[test]
    fn test_agent_answered_is_sticky() {
        let mut session = TelephonySession::new(None, Utc::now());
        push(&mut session, "ch1", created(1));
        push(&mut session, "ch1", switched(ChannelState::Answered));

        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert!(!state.agent_answered(), "answered without agent audio does not count");

        push(&mut session, "ch1", audio(true));
        push(&mut session, "ch1", ChannelEventKind::HungUp { cause: Some("normal".to_string()) });

        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert!(state.agent_answered());
        assert_eq!(state.active_channel_count(), 0);
    }

    #[test]
    fn test_agent_participation() {
        let mut session = TelephonySession::new(None, Utc::now());
        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert!(!state.agent_participates_in_call());

        push(&mut session, "ch1", created(1));
        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert!(state.agent_participates_in_call());

        session.forwarded = true;
        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert!(state.is_forwarded());
        assert_eq!(state.active_channel_count(), 1);
        assert!(!state.agent_participates_in_call());
    }

    #[test]
    fn test_events_fold_in_sequence_order() {
        let mut session = TelephonySession::new(None, Utc::now());
        push(&mut session, "ch1", created(1));
        push(&mut session, "ch1", switched(ChannelState::Ringing));
        push(&mut session, "ch1", switched(ChannelState::Answered));
        session.events.reverse();

        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert_eq!(state.get_channel("ch1").unwrap().state, ChannelState::Answered);
    }

    #[test]
    fn test_customer_channel_prefers_channel_without_agent_audio() {
        let mut session = TelephonySession::new(None, Utc::now());
        push(&mut session, "agent-leg", created(1));
        push(&mut session, "agent-leg", audio(true));
        push(&mut session, "customer-leg", created(2));

        let state = DerivedTelephonyState::create_from_telephony_session(&session);
        assert_eq!(state.customer_channel().unwrap().channel_id, ChannelId::from("customer-leg"));
    }
}
