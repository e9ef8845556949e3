use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::{Result, TelegramMcpError};
use crate::ipc::{read_bounded_line, IpcErrorBody, IpcRequest, IpcResponse, MAX_LINE_BYTES};

/// Dispatches decoded requests and observes client lifecycle.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request; the Ok value becomes the `result` payload and an
    /// Err travels back as the `error` payload. Never tears down the
    /// connection.
    async fn handle(&self, client_id: Uuid, method: &str, params: Value) -> Result<Value>;

    /// Called once after a client's connection has closed.
    async fn client_disconnected(&self, client_id: Uuid);
}

/// Unix socket server speaking the NDJSON request/response protocol.
///
/// Each connection gets a UUID client id and its own reader task; each
/// request line is dispatched in its own task so a long-polling request
/// never blocks other traffic on the same connection.
pub struct IpcServer {
    socket_path: PathBuf,
    shutdown_signal: Arc<Notify>,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            shutdown_signal: Arc::new(Notify::new()),
        }
    }

    /// Bind the socket and accept connections until shutdown.
    pub async fn serve<H: RequestHandler>(&self, handler: Arc<H>) -> Result<()> {
        // Remove a stale socket file left by a crashed daemon.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| TelegramMcpError::Ipc {
                reason: format!(
                    "failed to bind socket at {}: {}",
                    self.socket_path.display(),
                    e
                ),
            })?;
        restrict_socket_permissions(&self.socket_path);

        tracing::info!(socket = %self.socket_path.display(), "daemon listening");

        let shutdown = self.shutdown_signal.clone();

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                let client_id = Uuid::new_v4();
                                tracing::debug!(%client_id, "client connected");
                                if let Err(e) = handle_connection(stream, client_id, handler.clone()).await {
                                    tracing::warn!(%client_id, "connection error: {}", e);
                                }
                                tracing::debug!(%client_id, "client disconnected");
                                handler.client_disconnected(client_id).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.notified() => {
                    tracing::info!("daemon shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    /// Graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown_signal.notify_one();
    }
}

/// Read request lines from one client until EOF, dispatching each to the
/// handler concurrently.
async fn handle_connection<H: RequestHandler>(
    stream: UnixStream,
    client_id: Uuid,
    handler: Arc<H>,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));
    let mut reader = BufReader::new(reader);

    loop {
        // Bounded read: a client streaming an unterminated line loses its
        // connection instead of growing the buffer without limit.
        let line = match read_bounded_line(&mut reader, MAX_LINE_BYTES).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                return Err(TelegramMcpError::Ipc {
                    reason: format!("read failed: {}", e),
                })
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<IpcRequest>(trimmed) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(%client_id, "malformed request line: {}", e);
                // The correlation id is unrecoverable from an unparsable line.
                let response = IpcResponse {
                    id: Uuid::nil(),
                    result: None,
                    error: Some(IpcErrorBody {
                        message: "malformed request JSON".into(),
                        code: Some("PARSE_ERROR".into()),
                    }),
                };
                write_response(&writer, &response).await;
                continue;
            }
        };

        let handler = handler.clone();
        let writer = writer.clone();
        tokio::spawn(async move {
            let IpcRequest { id, method, params } = request;
            let response = match handler.handle(client_id, &method, params).await {
                Ok(result) => IpcResponse {
                    id,
                    result: Some(result),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(%client_id, %method, "handler error: {}", e);
                    IpcResponse {
                        id,
                        result: None,
                        error: Some(IpcErrorBody {
                            message: e.to_string(),
                            code: Some(e.code().to_string()),
                        }),
                    }
                }
            };
            write_response(&writer, &response).await;
        });
    }

    Ok(())
}

async fn write_response(writer: &Arc<Mutex<OwnedWriteHalf>>, response: &IpcResponse) {
    let json = match serde_json::to_string(response) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("failed to serialize response: {}", e);
            return;
        }
    };
    let mut writer = writer.lock().await;
    let written = async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await
    }
    .await;
    if let Err(e) = written {
        tracing::warn!("failed to write response: {}", e);
    }
}

/// Restrict the socket file to the owner (0600).
#[cfg(unix)]
fn restrict_socket_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    let _ = std::fs::set_permissions(path, perms);
}

#[cfg(not(unix))]
fn restrict_socket_permissions(_path: &std::path::Path) {
    // No-op on non-Unix platforms
}
