//! IPC client for communicating with the session daemon.
//!
//! This module provides:
//! - Unix Domain Socket client
//! - Request/response handling
//! - Connection retry logic
//! - Event streaming for `subscribe`

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::daemon::default_socket_path;
use crate::types::{EngineEvent, EngineState, IpcRequest, IpcResponse};

// ============================================================================
// Constants
// ============================================================================

/// Connection timeout in seconds
const CONNECTION_TIMEOUT_SECS: u64 = 5;

/// Read/write timeout in seconds
const IO_TIMEOUT_SECS: u64 = 5;

/// Maximum response size in bytes (64KB)
const MAX_RESPONSE_SIZE: u64 = 65536;

/// Maximum attempts per request
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds (base delay, multiplied by attempt number)
const RETRY_DELAY_MS: u64 = 500;

// ============================================================================
// DaemonError
// ============================================================================

/// Error reported by the daemon itself (as opposed to a transport failure).
///
/// These are never retried: the daemon answered, and asking again would get
/// the same answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DaemonError {
    /// Machine-readable code such as `already_running`
    pub code: Option<String>,
    pub message: String,
}

impl DaemonError {
    fn from_response(response: IpcResponse) -> Self {
        Self {
            code: response.code,
            message: response.message,
        }
    }
}

// ============================================================================
// IpcClient
// ============================================================================

/// IPC client for daemon communication.
#[derive(Debug, Clone)]
pub struct IpcClient {
    /// Socket path
    socket_path: PathBuf,
    /// Connection timeout
    timeout: Duration,
    /// Attempts per request
    max_retries: u32,
}

impl IpcClient {
    /// Creates a new IPC client with the default socket path.
    pub fn new() -> Result<Self> {
        Ok(Self::with_socket_path(default_socket_path()?))
    }

    /// Creates a new IPC client with a custom socket path.
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
        }
    }

    /// Overrides the number of attempts per request (minimum 1).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Starts a session. `None` uses the daemon's default duration.
    pub async fn start(&self, planned_duration_sec: Option<i64>) -> Result<EngineState> {
        let request = IpcRequest::StartSession {
            planned_duration_sec,
        };
        self.command(&request).await
    }

    /// Stops the running session.
    pub async fn stop(&self) -> Result<EngineState> {
        self.command(&IpcRequest::StopSession).await
    }

    /// Fetches the current state.
    pub async fn get_state(&self) -> Result<EngineState> {
        self.command(&IpcRequest::GetState).await
    }

    /// Opens a subscription. The returned stream yields events until the
    /// daemon goes away or the stream is dropped.
    pub async fn subscribe(&self) -> Result<EventStream> {
        self.with_retry(|| self.open_subscription()).await
    }

    /// Sends `request` and returns the state carried by a success response.
    async fn command(&self, request: &IpcRequest) -> Result<EngineState> {
        let response = self.send_request_with_retry(request).await?;
        response
            .data
            .context("Daemonの応答に状態が含まれていません")
    }

    /// Sends a request to the daemon with retry logic.
    ///
    /// Error responses from the daemon are returned as [`DaemonError`].
    pub async fn send_request_with_retry(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let response = self.with_retry(|| self.send_request(request)).await?;
        Ok(response)
    }

    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.downcast_ref::<DaemonError>().is_some() => return Err(e),
                Err(e) if attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "リクエスト失敗 (試行 {}/{}): {}",
                        attempt,
                        self.max_retries,
                        e
                    );
                    let delay = Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Connects and writes `request`.
    async fn connect_and_send(&self, request: &IpcRequest) -> Result<UnixStream> {
        let mut stream = timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("接続がタイムアウトしました")?
            .context("Daemonに接続できません。'waypace daemon' を起動してください")?;

        let request_json =
            serde_json::to_vec(request).context("リクエストのシリアライズに失敗しました")?;

        timeout(
            Duration::from_secs(IO_TIMEOUT_SECS),
            stream.write_all(&request_json),
        )
        .await
        .context("書き込みがタイムアウトしました")?
        .context("リクエストの送信に失敗しました")?;

        timeout(Duration::from_secs(IO_TIMEOUT_SECS), stream.flush())
            .await
            .context("フラッシュがタイムアウトしました")?
            .context("フラッシュに失敗しました")?;

        Ok(stream)
    }

    /// Sends a single one-shot request to the daemon.
    async fn send_request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut stream = self.connect_and_send(request).await?;

        // Shutdown write side to signal end of request
        stream
            .shutdown()
            .await
            .context("シャットダウンに失敗しました")?;

        let mut buffer = Vec::new();
        timeout(
            Duration::from_secs(IO_TIMEOUT_SECS),
            (&mut stream)
                .take(MAX_RESPONSE_SIZE)
                .read_to_end(&mut buffer),
        )
        .await
        .context("読み込みがタイムアウトしました")?
        .context("レスポンスの受信に失敗しました")?;

        if buffer.is_empty() {
            anyhow::bail!("Daemonからの応答がありませんでした");
        }

        let response: IpcResponse =
            serde_json::from_slice(&buffer).context("レスポンスのパースに失敗しました")?;

        if !response.is_success() {
            return Err(DaemonError::from_response(response).into());
        }

        Ok(response)
    }

    async fn open_subscription(&self) -> Result<EventStream> {
        // The write half stays open: the daemon treats EOF as unsubscribe.
        let stream = self.connect_and_send(&IpcRequest::Subscribe).await?;
        let mut lines = BufReader::new(stream).lines();

        let ack = timeout(Duration::from_secs(IO_TIMEOUT_SECS), lines.next_line())
            .await
            .context("読み込みがタイムアウトしました")?
            .context("レスポンスの受信に失敗しました")?
            .context("Daemonからの応答がありませんでした")?;

        let response: IpcResponse =
            serde_json::from_str(&ack).context("レスポンスのパースに失敗しました")?;

        if !response.is_success() {
            return Err(DaemonError::from_response(response).into());
        }

        let initial = response
            .data
            .context("Daemonの応答に状態が含まれていません")?;

        Ok(EventStream { lines, initial })
    }
}

// ============================================================================
// EventStream
// ============================================================================

/// Open subscription to the daemon's notifications.
#[derive(Debug)]
pub struct EventStream {
    lines: Lines<BufReader<UnixStream>>,
    initial: EngineState,
}

impl EventStream {
    /// State reported when the subscription was opened.
    pub fn initial_state(&self) -> &EngineState {
        &self.initial
    }

    /// Waits for the next event. Returns `None` when the daemon closes the
    /// connection.
    pub async fn next_event(&mut self) -> Result<Option<EngineEvent>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .context("イベントの受信に失敗しました")?;

            match line {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let event = serde_json::from_str(&line)
                        .with_context(|| format!("イベントのパースに失敗しました: {}", line))?;
                    return Ok(Some(event));
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
