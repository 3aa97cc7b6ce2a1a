//! # Agent Sessions
//!
//! An agent session spans one agent's login to logout. Its state lives in an
//! append-only log: every transition inserts a new [`AgentSessionLogEntry`]
//! and tombstones the previous one in the same unit of work, so the history of
//! a session can always be replayed.
//!
//! An agent has at most one active session at any time. The storage layer
//! enforces this and reports violations as
//! [`CaseEngineError::DuplicateActiveSession`](crate::error::CaseEngineError::DuplicateActiveSession).

pub mod manager;
pub mod sweep;
pub mod types;

pub use manager::AgentSessionManager;
pub use sweep::{InactivitySweeper, SweepFailure, SweepReport};
pub use types::{compare_by_priority, AgentSession, AgentSessionLogEntry, AgentSessionStatus};
