//! Daemon module for the session timer.
//!
//! This module contains the core daemon functionality:
//! - `timer`: Session engine with state transitions and the ticker task
//! - `clock`: Wall-clock and monotonic time sources
//! - `subscribers`: Registry of notification subscribers
//! - `error`: Engine error types
//! - `ipc`: Unix socket server exposing the engine

pub mod clock;
pub mod error;
pub mod ipc;
pub mod subscribers;
pub mod timer;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::types::EngineConfig;

pub use clock::{Clock, MockClock, SystemClock};
pub use error::EngineError;
pub use ipc::{default_socket_path, IpcServer, RequestHandler};
pub use subscribers::{SubscriberId, Subscription};
pub use timer::{SessionEngine, TickOutcome};

/// Runs the daemon until Ctrl-C.
///
/// Binds `socket_path`, serves requests against a fresh engine and, on
/// shutdown, cancels any running session ticker.
pub async fn run(config: EngineConfig, socket_path: &Path) -> Result<()> {
    config.validate().map_err(anyhow::Error::msg)?;

    let engine = Arc::new(SessionEngine::new(config));
    let server = IpcServer::new(socket_path)?;
    let handler = Arc::new(RequestHandler::new(Arc::clone(&engine)));

    tracing::info!(
        socket = %socket_path.display(),
        default_duration_sec = engine.config().default_duration_sec,
        tick_interval_ms = engine.config().tick_interval_ms,
        "デーモンを起動しました"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("シグナルハンドラを登録できません: {}", e);
            std::future::pending::<()>().await;
        }
    };

    server.serve(handler, shutdown).await?;
    engine.shutdown().await;

    tracing::info!("デーモンを終了しました");
    Ok(())
}
