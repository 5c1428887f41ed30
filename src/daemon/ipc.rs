//! IPC Server for the session timer daemon.
//!
//! This module provides Unix Domain Socket IPC functionality:
//! - Server that listens on a Unix socket
//! - Request/response handling for engine commands
//! - Event streaming for `subscribe` connections

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::{timeout, Duration};

use crate::types::{IpcRequest, IpcResponse};

use super::error::EngineError;
use super::subscribers::Subscription;
use super::timer::SessionEngine;

// ============================================================================
// Constants
// ============================================================================

/// Socket directory, relative to the home directory
const SOCKET_DIR: &str = ".waypace";

/// Socket file name
const SOCKET_FILE: &str = "waypace.sock";

/// Maximum request size in bytes (4KB)
const MAX_REQUEST_SIZE: usize = 4096;

/// Read timeout in seconds
const READ_TIMEOUT_SECS: u64 = 5;

/// Returns the default socket path (`~/.waypace/waypace.sock`).
pub fn default_socket_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("ホームディレクトリが見つかりません")?;
    Ok(home.join(SOCKET_DIR).join(SOCKET_FILE))
}

// ============================================================================
// IpcError
// ============================================================================

/// IPC-specific error types.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// Read error
    #[error("Failed to read request: {0}")]
    ReadError(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Request too large
    #[error("Request too large (max {MAX_REQUEST_SIZE} bytes)")]
    RequestTooLarge,

    /// Client closed the connection before sending a request
    #[error("Connection closed by client")]
    ConnectionClosed,
}

// ============================================================================
// IpcServer
// ============================================================================

/// Unix Domain Socket IPC server.
pub struct IpcServer {
    /// Unix socket listener
    listener: UnixListener,
    /// Socket path (for cleanup)
    socket_path: PathBuf,
}

impl IpcServer {
    /// Creates a new IPC server bound to the specified socket path.
    ///
    /// If the socket file already exists, it will be removed before binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn new(socket_path: &Path) -> Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove existing socket: {:?}", socket_path))?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {:?}", socket_path))?;

        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Accepts an incoming client connection.
    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .context("Failed to accept connection")?;
        Ok(stream)
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Each connection is served on its own task, so a long-lived
    /// `subscribe` stream never blocks other clients.
    pub async fn serve<F>(&self, handler: Arc<RequestHandler>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("シャットダウン要求を受信しました");
                    break;
                }
                accepted = self.accept() => match accepted {
                    Ok(stream) => {
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            if let Err(e) = handler.serve_connection(stream).await {
                                tracing::warn!("接続の処理に失敗しました: {:#}", e);
                            }
                        });
                    }
                    Err(e) => tracing::warn!("{:#}", e),
                },
            }
        }

        Ok(())
    }

    /// Receives and deserializes an IPC request from the stream.
    ///
    /// Applies a read timeout to prevent blocking indefinitely.
    pub async fn receive_request(stream: &mut UnixStream) -> Result<IpcRequest> {
        // One spare byte tells a request of exactly the limit from a larger one
        let mut buffer = vec![0u8; MAX_REQUEST_SIZE + 1];

        let read_result = timeout(
            Duration::from_secs(READ_TIMEOUT_SECS),
            stream.read(&mut buffer),
        )
        .await;

        let n = match read_result {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(IpcError::ReadError(e.to_string()).into()),
            Err(_) => return Err(IpcError::Timeout.into()),
        };

        if n == 0 {
            return Err(IpcError::ConnectionClosed.into());
        }
        if n > MAX_REQUEST_SIZE {
            return Err(IpcError::RequestTooLarge.into());
        }

        let request: IpcRequest = serde_json::from_slice(&buffer[..n])
            .with_context(|| "Failed to deserialize IPC request")?;

        Ok(request)
    }

    /// Serializes and sends an IPC response to the stream.
    pub async fn send_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
        write_json_line(stream, response)
            .await
            .context("Failed to write response")
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

/// Writes `value` as one line of JSON and flushes.
async fn write_json_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(value).context("Failed to serialize message")?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// RequestHandler
// ============================================================================

/// Handles IPC requests by dispatching to the session engine.
pub struct RequestHandler {
    engine: Arc<SessionEngine>,
}

impl RequestHandler {
    /// Creates a new request handler for the given engine.
    pub fn new(engine: Arc<SessionEngine>) -> Self {
        Self { engine }
    }

    /// Reads one request from `stream` and answers it.
    ///
    /// `subscribe` requests keep the connection open and stream events until
    /// the client disconnects.
    pub async fn serve_connection(&self, mut stream: UnixStream) -> Result<()> {
        let request = IpcServer::receive_request(&mut stream).await?;
        tracing::debug!(command = request.command(), "リクエストを受信しました");

        match request {
            IpcRequest::Subscribe => self.stream_events(stream).await,
            request => {
                let response = self.handle(request).await;
                IpcServer::send_response(&mut stream, &response).await
            }
        }
    }

    /// Handles a one-shot IPC request and returns the response.
    pub async fn handle(&self, request: IpcRequest) -> IpcResponse {
        match request {
            IpcRequest::GetState => {
                IpcResponse::success("", Some(self.engine.get_state().await))
            }
            IpcRequest::StartSession {
                planned_duration_sec,
            } => match self.engine.start(planned_duration_sec).await {
                Ok(state) => IpcResponse::success("セッションを開始しました", Some(state)),
                Err(e) => Self::error_response(&e),
            },
            IpcRequest::StopSession => match self.engine.stop().await {
                Ok(state) => IpcResponse::success("セッションを停止しました", Some(state)),
                Err(e) => Self::error_response(&e),
            },
            IpcRequest::Subscribe => IpcResponse::error(
                "unsupported",
                "subscribeはストリーミング接続でのみ利用できます",
            ),
        }
    }

    /// Streams engine events over `stream` as JSON lines.
    ///
    /// The first line is a success response carrying the current state. The
    /// subscription is removed when the client disconnects or a write fails.
    pub async fn stream_events(&self, mut stream: UnixStream) -> Result<()> {
        let (mut subscription, state) = self.engine.subscribe_with_state().await;
        let subscriber = subscription.id();
        tracing::debug!(%subscriber, "購読を開始しました");

        let result = match IpcServer::send_response(
            &mut stream,
            &IpcResponse::success("購読を開始しました", Some(state)),
        )
        .await
        {
            Ok(()) => {
                let (mut reader, mut writer) = stream.split();
                forward_events(&mut subscription, &mut reader, &mut writer).await
            }
            Err(e) => Err(e),
        };

        self.engine.unsubscribe(subscriber).await;
        tracing::debug!(%subscriber, "購読を終了しました");
        result
    }

    fn error_response(error: &EngineError) -> IpcResponse {
        IpcResponse::error(error.code(), error.to_string())
    }
}

async fn forward_events<R, W>(
    subscription: &mut Subscription,
    reader: &mut R,
    writer: &mut W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut probe = [0u8; 64];

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                write_json_line(writer, &event)
                    .await
                    .context("Failed to write event")?;
            }
            read = reader.read(&mut probe) => match read {
                // Client hung up
                Ok(0) | Err(_) => return Ok(()),
                Ok(_) => {}
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
