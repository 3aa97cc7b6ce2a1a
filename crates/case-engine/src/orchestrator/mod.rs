//! # Service Center Orchestration
//!
//! Assembles the managers into a running engine and wires them together with
//! domain event listeners.
//!
//! ## Listener order
//!
//! 1. [`CaseLifecycleListener`] queues created/unassigned cases and dequeues
//!    closed ones
//! 2. [`MatchingTrigger`] runs (or requests) a matching pass
//! 3. [`AgentConnectListener`] connects live calls to the agent they were
//!    assigned to
//!
//! ## Example
//!
//! ```rust,no_run
//! use sc_case_engine::config::EngineConfig;
//! use sc_case_engine::orchestrator::ServiceCenterEngine;
//!
//! # async fn example() -> sc_case_engine::error::Result<()> {
//! let mut engine = ServiceCenterEngine::builder()
//!     .with_config(EngineConfig::default())
//!     .with_in_memory_store()
//!     .build()
//!     .await?;
//!
//! engine.start().await?;
//! let report = engine.process_case_queue().await?;
//! println!("📋 Assigned {} case(s)", report.assignments.len());
//! engine.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod listeners;

pub use engine::{ServiceCenterEngine, ServiceCenterEngineBuilder};
pub use listeners::{AgentConnectListener, CaseLifecycleListener, MatchingTrigger};
