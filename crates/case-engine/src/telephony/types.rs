//! Stored telephony session model: an append-only log of channel events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, TelephonySessionId};

/// Call progress of a single channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelState {
    Connecting,
    Ringing,
    Answered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Static metadata of a channel, captured when the provider creates it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub line_number: u32,
    /// Logical reference assigned by whoever requested the channel
    pub reference: Option<String>,
    pub local_number: String,
    pub remote_number: String,
    pub direction: CallDirection,
    pub provider_reference: Option<String>,
    pub company_id: Option<i64>,
}

impl ChannelMetadata {
    pub fn inbound(line_number: u32, local_number: impl Into<String>, remote_number: impl Into<String>) -> Self {
        Self {
            line_number,
            reference: None,
            local_number: local_number.into(),
            remote_number: remote_number.into(),
            direction: CallDirection::Inbound,
            provider_reference: None,
            company_id: None,
        }
    }

    pub fn outbound(line_number: u32, local_number: impl Into<String>, remote_number: impl Into<String>) -> Self {
        Self {
            direction: CallDirection::Outbound,
            ..Self::inbound(line_number, local_number, remote_number)
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_company(mut self, company_id: i64) -> Self {
        self.company_id = Some(company_id);
        self
    }
}

/// What happened to a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEventKind {
    Created { metadata: ChannelMetadata },
    StateSwitched { state: ChannelState },
    AudioConnectionChanged { connected_to_agent: bool },
    HungUp { cause: Option<String> },
}

/// One entry of a telephony session's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Position in the session log, starting at 1
    pub sequence: u64,
    pub channel_id: ChannelId,
    pub occurred_at: DateTime<Utc>,
    pub kind: ChannelEventKind,
}

/// A customer call as observed from provider events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelephonySession {
    pub id: TelephonySessionId,
    pub provider_reference: Option<String>,
    /// The agent handed the call over and is no longer a party to it
    pub forwarded: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub events: Vec<ChannelEvent>,
}

impl TelephonySession {
    pub fn new(provider_reference: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: TelephonySessionId::new(),
            provider_reference,
            forwarded: false,
            created_at,
            ended_at: None,
            events: Vec::new(),
        }
    }

    /// Not ended yet
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn next_sequence(&self) -> u64 {
        self.events.last().map_or(1, |event| event.sequence + 1)
    }
}
