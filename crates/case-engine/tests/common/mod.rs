//! Shared harness for the case engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use sc_case_engine::agent::AgentSession;
use sc_case_engine::clock::{Clock, ManualClock};
use sc_case_engine::config::EngineConfig;
use sc_case_engine::error::Result;
use sc_case_engine::events::{BroadcastMessage, ChannelBroadcaster};
use sc_case_engine::store::MemoryStore;
use sc_case_engine::telephony::{
    ChannelEventKind, ChannelMetadata, ChannelState, DerivedChannelState, TelephonyCommandDispatcher,
    TelephonySession,
};
use sc_case_engine::types::{Case, CaseId, CaseType, InternalPhoneId, NewCase, TelephonySessionId, WorkGroupId};
use sc_case_engine::ServiceCenterEngine;

/// A command the engine sent to the telephony provider
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    Connect {
        telephony_session_id: TelephonySessionId,
        channel_id: String,
        internal_phone_id: InternalPhoneId,
    },
    Hold(String),
    Resume(String),
    Hangup(String),
    SwitchTo(String),
}

#[derive(Default)]
pub struct RecordingDispatcher {
    commands: Mutex<Vec<RecordedCommand>>,
}

impl RecordingDispatcher {
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl TelephonyCommandDispatcher for RecordingDispatcher {
    async fn connect_to_agent(
        &self,
        telephony_session_id: TelephonySessionId,
        channel: &DerivedChannelState,
        internal_phone_id: &InternalPhoneId,
    ) -> Result<()> {
        self.commands.lock().push(RecordedCommand::Connect {
            telephony_session_id,
            channel_id: channel.channel_id.to_string(),
            internal_phone_id: internal_phone_id.clone(),
        });
        Ok(())
    }

    async fn hold(&self, _telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()> {
        self.commands.lock().push(RecordedCommand::Hold(channel.channel_id.to_string()));
        Ok(())
    }

    async fn resume(&self, _telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()> {
        self.commands.lock().push(RecordedCommand::Resume(channel.channel_id.to_string()));
        Ok(())
    }

    async fn hangup(&self, _telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()> {
        self.commands.lock().push(RecordedCommand::Hangup(channel.channel_id.to_string()));
        Ok(())
    }

    async fn switch_to(&self, _telephony_session_id: TelephonySessionId, channel: &DerivedChannelState) -> Result<()> {
        self.commands.lock().push(RecordedCommand::SwitchTo(channel.channel_id.to_string()));
        Ok(())
    }
}

pub struct TestCenter {
    pub engine: ServiceCenterEngine,
    pub clock: Arc<ManualClock>,
    pub broadcaster: Arc<ChannelBroadcaster>,
    pub commands: Arc<RecordingDispatcher>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
}

/// In-memory engine with inline matching and a manual clock
pub async fn test_center() -> TestCenter {
    test_center_with(EngineConfig::default()).await
}

pub async fn test_center_with(config: EngineConfig) -> TestCenter {
    let clock = Arc::new(ManualClock::new(start_time()));
    let broadcaster = Arc::new(ChannelBroadcaster::default());
    let commands = Arc::new(RecordingDispatcher::default());

    let engine = ServiceCenterEngine::builder()
        .with_config(config)
        .with_store(Arc::new(MemoryStore::new()))
        .with_clock(clock.clone())
        .with_broadcaster(broadcaster.clone())
        .with_command_dispatcher(commands.clone())
        .build()
        .await
        .expect("engine should build");

    TestCenter {
        engine,
        clock,
        broadcaster,
        commands,
    }
}

impl TestCenter {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn tick(&self) {
        self.clock.advance(chrono::Duration::seconds(1));
    }

    pub async fn start_agent(&self, agent: &str, priority: Option<i32>, work_groups: &[&str]) -> AgentSession {
        self.engine
            .sessions()
            .create_and_start_session(
                agent,
                format!("phone-{}", agent),
                true,
                priority,
                work_groups.iter().map(|group| WorkGroupId::from(*group)),
            )
            .await
            .expect("agent session should start")
    }

    pub async fn start_manual_agent(&self, agent: &str, work_groups: &[&str]) -> AgentSession {
        self.engine
            .sessions()
            .create_and_start_session(
                agent,
                format!("phone-{}", agent),
                false,
                None,
                work_groups.iter().map(|group| WorkGroupId::from(*group)),
            )
            .await
            .expect("agent session should start")
    }

    pub async fn open_electronic_case(&self, work_group: &str) -> Case {
        self.engine
            .cases()
            .open_case(NewCase::electronic(CaseType::QuoteFollowUp, work_group))
            .await
            .expect("case should open")
    }

    /// A telephony session with one ringing inbound customer channel
    pub async fn incoming_call(&self, channel_id: &str) -> TelephonySession {
        let recorder = self.engine.recorder();
        let session = recorder
            .open_session(Some(format!("provider-{}", channel_id)))
            .await
            .expect("telephony session should open");
        recorder
            .record_channel_event(
                session.id,
                channel_id,
                ChannelEventKind::Created {
                    metadata: ChannelMetadata::inbound(1, "+3120000000", "+3161234567"),
                },
            )
            .await
            .expect("channel should be created");
        recorder
            .record_channel_event(session.id, channel_id, ChannelEventKind::StateSwitched {
                state: ChannelState::Ringing,
            })
            .await
            .expect("channel should ring");
        session
    }

    pub async fn open_telephony_case(&self, work_group: &str, telephony_session_id: TelephonySessionId) -> Case {
        self.engine
            .cases()
            .open_case(NewCase::telephony(CaseType::InboundCall, work_group, Some(telephony_session_id)))
            .await
            .expect("case should open")
    }

    pub async fn current_case_of(&self, agent_session: &AgentSession) -> Option<CaseId> {
        self.engine
            .sessions()
            .find_session(agent_session.id)
            .await
            .unwrap()
            .expect("agent session should exist")
            .current_case_id()
    }
}

/// Everything published so far
pub fn drain(rx: &mut broadcast::Receiver<BroadcastMessage>) -> Vec<BroadcastMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}
