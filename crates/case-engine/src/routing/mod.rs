//! # Case Assignment
//!
//! The matcher pairs queued cases with available agent sessions. A pass is
//! triggered by `CaseOnQueue`, `CaseClosed`, `CaseWasUnassigned` and
//! `AgentSessionStarted`, either inline after the triggering unit of work or
//! through the debounced [`MatchingPassRunner`].
//!
//! Interactive assignment completes before any passive assignment is
//! attempted:
//!
//! ```text
//!  interactive queue (FIFO) ──► sessions available for interactive (by priority)
//!  passive queue (FIFO)     ──► sessions available for passive (by priority)
//! ```

pub mod job;
pub mod matcher;

pub use job::MatchingPassRunner;
pub use matcher::{Assignment, CaseAssignmentMatcher, MatchOutcome, MatchingReport};
