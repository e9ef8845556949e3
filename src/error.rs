use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TelegramMcpError {
    #[error("ipc error: {reason}")]
    Ipc { reason: String },

    #[error("socket not found at {path}")]
    SocketNotFound { path: PathBuf },

    #[error("ipc request timed out after {timeout_ms}ms (method: {method})")]
    RequestTimeout { method: String, timeout_ms: u64 },

    #[error("ipc connection closed while request was pending")]
    ConnectionClosed,

    #[error("failed to spawn daemon: {reason}")]
    DaemonSpawn { reason: String },

    #[error("daemon failed to start: socket not found at {path} after {waited_ms}ms")]
    DaemonStartTimeout { path: PathBuf, waited_ms: u64 },

    #[error("could not acquire lock on {path} after {attempts} attempts")]
    LockContended { path: PathBuf, attempts: u32 },

    #[error("invalid input: {reason}")]
    Validation { reason: String },

    #[error("question not found in session: {question_id}")]
    QuestionNotFound { question_id: String },

    #[error("question {question_id} is not answered yet (status: {status})")]
    QuestionNotAnswered { question_id: String, status: String },

    #[error("question {question_id} is marked answered but has no answer text")]
    AnswerMissing { question_id: String },

    #[error("question {question_id} is already answered")]
    AlreadyAnswered { question_id: String },

    #[error("no session registered for connection {client_id}")]
    SessionNotRegistered { client_id: String },

    #[error("unknown method: {method}")]
    UnknownMethod { method: String },

    #[error("daemon error: {message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TelegramMcpError {
    /// Stable machine-readable code carried in IPC error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            TelegramMcpError::Validation { .. } => "INVALID_INPUT",
            TelegramMcpError::QuestionNotFound { .. } => "QUESTION_NOT_FOUND",
            TelegramMcpError::QuestionNotAnswered { .. } => "NOT_ANSWERED",
            TelegramMcpError::AnswerMissing { .. } => "ANSWER_MISSING",
            TelegramMcpError::AlreadyAnswered { .. } => "ALREADY_ANSWERED",
            TelegramMcpError::SessionNotRegistered { .. } => "NO_SESSION",
            TelegramMcpError::UnknownMethod { .. } => "METHOD_NOT_FOUND",
            TelegramMcpError::LockContended { .. } => "LOCK_CONTENDED",
            TelegramMcpError::RequestTimeout { .. } => "TIMEOUT",
            _ => "HANDLER_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, TelegramMcpError>;
