//! Waypace Library
//!
//! This library provides the core functionality of the waypace session timer.
//! It includes:
//! - Session engine with Start/Stop/GetState commands, ticking and expiry
//! - Subscriber registry for state and tick notifications
//! - IPC server/client for daemon-CLI communication
//! - CLI command parsing and display utilities
//! - Type definitions for configuration, state and events

pub mod cli;
pub mod daemon;
pub mod types;

// Re-export commonly used types for convenience
pub use types::{
    EngineConfig, EngineEvent, EngineState, IdleStopPolicy, IpcRequest, IpcResponse,
    SessionStatus, StateChange, TickPayload, TransitionReason, DEFAULT_DURATION_SEC,
    DEFAULT_TICK_INTERVAL_MS,
};

pub use daemon::{
    Clock, EngineError, MockClock, SessionEngine, SubscriberId, Subscription, SystemClock,
    TickOutcome,
};
