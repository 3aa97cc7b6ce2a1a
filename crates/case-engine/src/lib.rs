//! # Service Center Case Engine
//!
//! Queueing, agent session tracking and case-to-agent assignment for a
//! contact center, plus derivation of live call state from recorded telephony
//! channel events.
//!
//! ## Overview
//!
//! - **[`agent`]**: agent sessions with an append-only status log
//! - **[`queue`]**: the case queue and the schedule of deferred cases
//! - **[`routing`]**: the matcher pairing waiting cases with available agents
//! - **[`telephony`]**: channel event recording, derived call state and call commands
//! - **[`cases`]**: opening, closing and unassigning cases
//! - **[`orchestrator`]**: assembly, event wiring and background tasks
//! - **[`database`]** / **[`store`]**: SQLite and in-memory persistence
//!
//! State changes run as units of work: locks are taken first, the
//! transaction commits, the locks are released, and only then are domain
//! events delivered to listeners and broadcasts published to subscribers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sc_case_engine::prelude::*;
//!
//! # async fn example() -> sc_case_engine::error::Result<()> {
//! let mut engine = ServiceCenterEngine::builder()
//!     .with_config(EngineConfig::default())
//!     .with_in_memory_store()
//!     .build()
//!     .await?;
//! engine.start().await?;
//!
//! let session = engine
//!     .sessions()
//!     .create_and_start_session("agent-001", "ext-1001", true, None, [WorkGroupId::from("support")])
//!     .await?;
//! let case = engine
//!     .cases()
//!     .open_case(NewCase::electronic(CaseType::Callback, "support"))
//!     .await?;
//!
//! // Inline matching has already handed the case to the agent
//! let session = engine.sessions().find_active_session_for_agent(&session.agent_id).await?;
//! assert_eq!(session.current_case_id(), Some(case.id));
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cases;
pub mod clock;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod events;
pub mod locks;
pub mod logging;
pub mod orchestrator;
pub mod queue;
pub mod routing;
pub mod store;
pub mod telephony;
pub mod types;

pub use config::EngineConfig;
pub use error::{CaseEngineError, Result};
pub use orchestrator::{ServiceCenterEngine, ServiceCenterEngineBuilder};

/// Commonly used types
pub mod prelude {
    pub use crate::agent::{AgentSession, AgentSessionLogEntry, AgentSessionManager, AgentSessionStatus, SweepReport};
    pub use crate::cases::CaseManager;
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{EngineConfig, MatchingMode};
    pub use crate::database::SqliteStore;
    pub use crate::error::{CaseEngineError, Result};
    pub use crate::events::{BroadcastMessage, ChannelBroadcaster, DomainEvent, DomainEventListener};
    pub use crate::orchestrator::{ServiceCenterEngine, ServiceCenterEngineBuilder};
    pub use crate::queue::{CaseQueueEntry, CaseQueueManager, CaseScheduleEntry, CaseScheduleManager, QueuedCase};
    pub use crate::routing::{CaseAssignmentMatcher, MatchingReport};
    pub use crate::store::{MemoryStore, Store};
    pub use crate::telephony::{
        ChannelEventKind, ChannelMetadata, ChannelState, DerivedTelephonyState, TelephonyCommandService,
        TelephonySessionRecorder,
    };
    pub use crate::types::{
        AgentId, AgentSessionId, AssignmentClass, Case, CaseId, CaseStatus, CaseType, ContactMethod, InternalPhoneId,
        NewCase, TelephonySessionId, WorkGroupId,
    };
}
