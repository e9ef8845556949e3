use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::error::{Result, TelegramMcpError};
use crate::ipc::{read_bounded_line, IpcRequest, IpcResponse, MAX_LINE_BYTES};

/// Default timeout for most IPC methods.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<IpcResponse>>>>;

/// Unix socket client speaking the NDJSON request/response protocol.
///
/// Requests are correlated by UUID. A background task reads response lines
/// and resolves the matching in-flight request; when the socket closes, every
/// still-pending request fails fast with a connection-closed error instead of
/// waiting out its timeout.
pub struct IpcClient {
    socket_path: PathBuf,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    read_task: tokio::task::JoinHandle<()>,
}

impl IpcClient {
    /// Connect to the daemon socket and start the response reader.
    ///
    /// Fails with a descriptive error when no daemon is listening (the
    /// ENOENT / ECONNREFUSED class of failures).
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream =
            UnixStream::connect(socket_path)
                .await
                .map_err(|e| TelegramMcpError::Ipc {
                    reason: format!("connect to {} failed: {}", socket_path.display(), e),
                })?;
        let (reader, writer) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let read_task = tokio::spawn(read_loop(reader, pending.clone()));

        tracing::debug!(socket = %socket_path.display(), "connected to daemon");
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            writer: Mutex::new(writer),
            pending,
            read_task,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and wait for its response, up to `timeout`.
    ///
    /// A timeout removes the pending entry, so a late response is dropped by
    /// the reader rather than misdelivered to a different caller.
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        let id = Uuid::new_v4();
        let request = IpcRequest {
            id,
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&request)?;
        {
            let mut writer = self.writer.lock().await;
            let written = async {
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await
            }
            .await;
            if let Err(e) = written {
                self.pending.lock().await.remove(&id);
                return Err(TelegramMcpError::Ipc {
                    reason: format!("write failed: {}", e),
                });
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.error {
                    return Err(TelegramMcpError::Daemon {
                        message: error.message,
                        code: error.code,
                    });
                }
                Ok(response.result.unwrap_or(Value::Null))
            }
            // Sender dropped without a response: the reader drained the
            // pending map when the socket closed.
            Ok(Err(_)) => Err(TelegramMcpError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(TelegramMcpError::RequestTimeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Per-method timeout policy. Pure.
    ///
    /// The IPC deadline must strictly outlast the business-level wait it
    /// wraps, so a transport timeout can never mask a legitimate business
    /// timeout: a blocking ask gets its caller-supplied minutes plus a
    /// one-minute buffer, a long-poll check gets its effective wait plus ten
    /// seconds.
    pub fn method_timeout(method: &str, params: &Value) -> Duration {
        match method {
            "ask_blocking_question" => {
                let minutes = params
                    .get("timeout_minutes")
                    .and_then(Value::as_f64)
                    .unwrap_or(30.0)
                    .max(0.0);
                Duration::from_secs_f64(minutes * 60.0 + 60.0)
            }
            "check_question_answers" => {
                // Mirror the daemon's long-poll default (60s) and clamp
                // (300s); an omitted wait still long-polls on the daemon side.
                let wait = params
                    .get("wait_seconds")
                    .and_then(Value::as_u64)
                    .unwrap_or(60)
                    .min(300);
                Duration::from_secs(wait + 10)
            }
            _ => DEFAULT_TIMEOUT,
        }
    }

    /// Close the connection and stop the response reader.
    pub fn disconnect(self) {
        // Drop aborts the reader and closes the socket halves.
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

async fn read_loop(reader: OwnedReadHalf, pending: PendingMap) {
    let mut reader = BufReader::new(reader);
    loop {
        match read_bounded_line(&mut reader, MAX_LINE_BYTES).await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let response: IpcResponse = match serde_json::from_str(trimmed) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!("dropping malformed response line: {}", e);
                        continue;
                    }
                };
                let sender = pending.lock().await.remove(&response.id);
                match sender {
                    Some(tx) => {
                        // The receiver may have timed out already; that is fine.
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::warn!(id = %response.id, "response for unknown request id, dropping");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("dropping daemon connection: {}", e);
                break;
            }
        }
    }

    // Socket closed: fail every in-flight request instead of letting each
    // wait out its own timeout.
    pending.lock().await.clear();
    tracing::debug!("daemon connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ask_timeout_wraps_business_timeout_with_buffer() {
        let timeout = IpcClient::method_timeout(
            "ask_blocking_question",
            &json!({ "question": "x", "timeout_minutes": 5 }),
        );
        assert_eq!(timeout, Duration::from_secs(5 * 60 + 60));
    }

    #[test]
    fn ask_timeout_defaults_to_thirty_minutes() {
        let timeout = IpcClient::method_timeout("ask_blocking_question", &json!({}));
        assert_eq!(timeout, Duration::from_secs(30 * 60 + 60));
    }

    #[test]
    fn check_timeout_adds_buffer_to_wait() {
        let timeout =
            IpcClient::method_timeout("check_question_answers", &json!({ "wait_seconds": 60 }));
        assert_eq!(timeout, Duration::from_secs(70));
    }

    #[test]
    fn check_without_wait_covers_the_daemon_default_poll() {
        // The daemon long-polls 60s when wait_seconds is omitted; the
        // transport deadline must outlast that, not fall back to 30s.
        let timeout = IpcClient::method_timeout("check_question_answers", &json!({}));
        assert_eq!(timeout, Duration::from_secs(70));
    }

    #[test]
    fn check_timeout_clamps_like_the_daemon() {
        let timeout =
            IpcClient::method_timeout("check_question_answers", &json!({ "wait_seconds": 9_999 }));
        assert_eq!(timeout, Duration::from_secs(310));
    }

    #[test]
    fn other_methods_use_default() {
        let timeout = IpcClient::method_timeout("register_session", &Value::Null);
        assert_eq!(timeout, DEFAULT_TIMEOUT);
    }
}
