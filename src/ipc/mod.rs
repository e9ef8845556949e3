pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use uuid::Uuid;

/// Longest line either side will buffer before giving up on the peer.
pub(crate) const MAX_LINE_BYTES: usize = 1_048_576;

/// One request line, adapter to daemon. NDJSON: one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub id: Uuid,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Error payload carried in a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// One response line, daemon to adapter. Exactly one of `result` or `error`
/// is populated; the `id` matches the request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<IpcErrorBody>,
}

/// Read one newline-delimited line, failing once it exceeds `limit` bytes.
///
/// `lines()` grows its buffer without bound, so a peer streaming an
/// unterminated line could exhaust memory. Returns `Ok(None)` at EOF; a
/// stream that ends without a trailing newline yields its final partial line.
pub(crate) async fn read_bounded_line<R>(
    reader: &mut R,
    limit: usize,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line: Vec<u8> = Vec::new();
    loop {
        let (done, used) = {
            let chunk = reader.fill_buf().await?;
            if chunk.is_empty() {
                if line.is_empty() {
                    return Ok(None);
                }
                (true, 0)
            } else if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..pos]);
                (true, pos + 1)
            } else {
                line.extend_from_slice(chunk);
                (false, chunk.len())
            }
        };
        reader.consume(used);
        if line.len() > limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes", limit),
            ));
        }
        if done {
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_reader_splits_on_newline() {
        let mut reader = tokio::io::BufReader::new(&b"one\ntwo\n"[..]);
        let first = read_bounded_line(&mut reader, 16).await.unwrap();
        assert_eq!(first.as_deref(), Some("one"));
        let second = read_bounded_line(&mut reader, 16).await.unwrap();
        assert_eq!(second.as_deref(), Some("two"));
        assert!(read_bounded_line(&mut reader, 16).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bounded_reader_returns_trailing_partial_line() {
        let mut reader = tokio::io::BufReader::new(&b"no newline"[..]);
        let line = read_bounded_line(&mut reader, 16).await.unwrap();
        assert_eq!(line.as_deref(), Some("no newline"));
        assert!(read_bounded_line(&mut reader, 16).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_line_is_an_error() {
        let blob = vec![b'x'; 64];
        let mut reader = tokio::io::BufReader::new(&blob[..]);
        let err = read_bounded_line(&mut reader, 16).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
