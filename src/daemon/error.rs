//! Session engine error types.
//!
//! Every engine error is recoverable: the engine state is left unchanged and
//! the caller decides how to present the failure.

use thiserror::Error;

/// Errors returned by engine commands.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// `start` was called while a session is running.
    #[error("セッションは既に実行中です")]
    AlreadyRunning,

    /// `stop` was called while no session is running.
    #[error("実行中のセッションはありません")]
    NotRunning,

    /// The requested duration is not a positive number of seconds.
    #[error("セッション時間が不正です: {0}秒（1秒以上を指定してください）")]
    InvalidDuration(i64),
}

impl EngineError {
    /// Returns the stable machine-readable code used on the wire.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::NotRunning => "not_running",
            Self::InvalidDuration(_) => "invalid_duration",
        }
    }
}
