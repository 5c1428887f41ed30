//! Core data types for the session timer.
//!
//! This module defines the data structures used for:
//! - Engine state snapshots and notifications
//! - Engine configuration with validation
//! - IPC request/response serialization

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Default planned session length (45 minutes).
pub const DEFAULT_DURATION_SEC: u64 = 45 * 60;

/// Default tick granularity in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

const MIN_TICK_INTERVAL_MS: u64 = 10;
const MAX_TICK_INTERVAL_MS: u64 = 60_000;

// ============================================================================
// SessionStatus
// ============================================================================

/// Lifecycle status of the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session exists
    #[default]
    Idle,
    /// A session is counting down
    Running,
}

impl SessionStatus {
    /// Returns the wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }
}

// ============================================================================
// EngineState
// ============================================================================

/// Authoritative snapshot of the engine.
///
/// `session_id` and `start_ts_ms` are present if and only if the status is
/// [`SessionStatus::Running`]. While idle, `planned_duration_sec` reports the
/// configured default and `remaining_sec` is 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub status: SessionStatus,
    pub session_id: Option<String>,
    pub planned_duration_sec: u64,
    pub start_ts_ms: Option<i64>,
    pub remaining_sec: u64,
}

impl EngineState {
    /// Creates the idle snapshot.
    pub fn idle(default_duration_sec: u64) -> Self {
        Self {
            status: SessionStatus::Idle,
            session_id: None,
            planned_duration_sec: default_duration_sec,
            start_ts_ms: None,
            remaining_sec: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Why a state-change notification was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// A caller started a session
    Started,
    /// A caller stopped the session
    Stopped,
    /// The planned duration elapsed
    Expired,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionReason::Started => "started",
            TransitionReason::Stopped => "stopped",
            TransitionReason::Expired => "expired",
        }
    }
}

/// Payload of a `session_state` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// State after the transition
    #[serde(flatten)]
    pub state: EngineState,
    /// What caused the transition
    pub reason: TransitionReason,
}

/// Payload of a `session_tick` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    pub session_id: String,
    pub remaining_sec: u64,
}

/// Events delivered to engine subscribers.
///
/// State changes and ticks travel on the same channel so that a subscriber
/// sees them in the order the engine produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The engine changed state
    SessionState(StateChange),
    /// Remaining time of the running session
    SessionTick(TickPayload),
}

impl EngineEvent {
    /// Returns the event channel name.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::SessionState(_) => "session_state",
            EngineEvent::SessionTick(_) => "session_tick",
        }
    }

    /// Returns the session this event refers to, if any.
    ///
    /// Terminal state events carry an idle snapshot and therefore no id.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            EngineEvent::SessionState(change) => change.state.session_id.as_deref(),
            EngineEvent::SessionTick(tick) => Some(&tick.session_id),
        }
    }
}

// ============================================================================
// EngineConfig
// ============================================================================

/// What `stop` does when no session is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleStopPolicy {
    /// Fail with `NotRunning`
    #[default]
    Reject,
    /// Succeed and return the idle state
    Ignore,
}

fn default_duration_sec() -> u64 {
    DEFAULT_DURATION_SEC
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

/// Configuration for the session engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Planned duration used when `start` is called without one
    #[serde(default = "default_duration_sec")]
    pub default_duration_sec: u64,
    /// Tick granularity in milliseconds (10-60000)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Behaviour of `stop` while idle
    #[serde(default)]
    pub stop_when_idle: IdleStopPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_duration_sec: DEFAULT_DURATION_SEC,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            stop_when_idle: IdleStopPolicy::Reject,
        }
    }
}

impl EngineConfig {
    /// Sets the default planned duration.
    #[must_use]
    pub fn with_default_duration_sec(mut self, seconds: u64) -> Self {
        self.default_duration_sec = seconds;
        self
    }

    /// Sets the tick granularity.
    #[must_use]
    pub fn with_tick_interval_ms(mut self, millis: u64) -> Self {
        self.tick_interval_ms = millis;
        self
    }

    /// Sets the idle-stop policy.
    #[must_use]
    pub fn with_stop_when_idle(mut self, policy: IdleStopPolicy) -> Self {
        self.stop_when_idle = policy;
        self
    }

    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their default values. The result is validated.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("設定ファイルの形式が不正です: {}", path.display()))?;
        config.validate().map_err(anyhow::Error::msg)?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_duration_sec == 0 {
            return Err("デフォルトのセッション時間は1秒以上を指定してください".to_string());
        }
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&self.tick_interval_ms) {
            return Err(format!(
                "ティック間隔は{}-{}ミリ秒の範囲で指定してください",
                MIN_TICK_INTERVAL_MS, MAX_TICK_INTERVAL_MS
            ));
        }
        Ok(())
    }
}

// ============================================================================
// IPC Types
// ============================================================================

/// IPC request from client to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Query the current state
    GetState,
    /// Start a new session
    StartSession {
        /// Planned duration in seconds; the configured default when absent
        #[serde(
            rename = "plannedDurationSec",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        planned_duration_sec: Option<i64>,
    },
    /// Stop the running session
    StopSession,
    /// Stream engine events over this connection
    Subscribe,
}

impl IpcRequest {
    /// Returns the command name.
    pub fn command(&self) -> &'static str {
        match self {
            IpcRequest::GetState => "get_state",
            IpcRequest::StartSession { .. } => "start_session",
            IpcRequest::StopSession => "stop_session",
            IpcRequest::Subscribe => "subscribe",
        }
    }
}

/// IPC response from daemon to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Response status ("success" or "error")
    pub status: String,
    /// Human-readable message
    pub message: String,
    /// Machine-readable error code (errors only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Engine state after the command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<EngineState>,
}

impl IpcResponse {
    /// Creates a success response.
    pub fn success(message: impl Into<String>, data: Option<EngineState>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            code: None,
            data,
        }
    }

    /// Creates an error response.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            code: Some(code.into()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

// ============================================================================
// Tests
// ============================================================================
