//! # Telephony
//!
//! Stored telephony sessions (an append-only channel event log), the pure
//! [`DerivedTelephonyState`] fold over that log, ingestion of provider events
//! through [`TelephonySessionRecorder`] and outbound call control through
//! [`TelephonyCommandService`].

pub mod commands;
pub mod recorder;
pub mod state;
pub mod types;

pub use commands::{TelephonyCommandDispatcher, TelephonyCommandService, TracingCommandDispatcher};
pub use recorder::TelephonySessionRecorder;
pub use state::{DerivedChannelState, DerivedTelephonyState};
pub use types::{
    CallDirection, ChannelEvent, ChannelEventKind, ChannelMetadata, ChannelState, TelephonySession,
};
