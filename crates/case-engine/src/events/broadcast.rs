//! Real-time broadcast contract for external UIs
//!
//! Channel names, event names and payload keys are consumed verbatim by
//! clients and must not change.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::trace;

use crate::types::{AgentSessionId, CaseId, TelephonySessionId};

/// One message on the real-time channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

impl BroadcastMessage {
    pub fn case_changed(case_id: CaseId) -> Self {
        Self {
            channel: format!("sc.case.{}", case_id),
            event: "sc.case.changed".to_string(),
            payload: json!({ "caseId": case_id }),
        }
    }

    pub fn agent_session_case_assigned(agent_session_id: AgentSessionId, case_id: CaseId) -> Self {
        Self {
            channel: format!("sc.agentSession.{}", agent_session_id),
            event: "sc.agentSession.caseAssigned".to_string(),
            payload: json!({ "caseId": case_id }),
        }
    }

    pub fn telephony_session_detached(agent_session_id: AgentSessionId) -> Self {
        Self {
            channel: format!("sc.agentSession.{}", agent_session_id),
            event: "sc.agentSession.telephonySessionDetached".to_string(),
            payload: json!({ "agentSessionId": agent_session_id }),
        }
    }

    pub fn queue_changed() -> Self {
        Self {
            channel: "sc.queue".to_string(),
            event: "sc.queue.changed".to_string(),
            payload: json!({}),
        }
    }

    pub fn case_assignment_changed() -> Self {
        Self {
            channel: "sc.case".to_string(),
            event: "sc.case.assignment.changed".to_string(),
            payload: json!({}),
        }
    }

    pub fn telephony_session_changed(telephony_session_id: TelephonySessionId) -> Self {
        Self {
            channel: format!("sc.telephonySession.{}", telephony_session_id),
            event: "sc.telephonySession.changed".to_string(),
            payload: json!({ "telephonySessionId": telephony_session_id }),
        }
    }
}

/// Publishes broadcast messages to whatever real-time transport is attached
pub trait Broadcaster: Send + Sync {
    fn publish(&self, message: BroadcastMessage);
}

/// Broadcaster backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.sender.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn publish(&self, message: BroadcastMessage) {
        trace!("📡 {} on {}", message.event, message.channel);
        // No subscribers is not an error
        let _ = self.sender.send(message);
    }
}

/// Drops every message
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn publish(&self, _message: BroadcastMessage) {}
}
