pub mod file_lock;
pub mod queue;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a relayed question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Pending,
    Answered,
}

impl std::fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuestionStatus::Pending => write!(f, "pending"),
            QuestionStatus::Answered => write!(f, "answered"),
        }
    }
}

/// A question raised by a caller session.
///
/// Created pending; flipped to answered in place exactly once. Never deleted
/// -- answered questions stay in the log as the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,

    pub session_id: String,

    pub question: String,

    /// Optional execution context shown alongside the question.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Group id linking follow-up questions into one conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    pub status: QuestionStatus,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
}

/// Immutable audit event recording that a question was answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerEvent {
    pub question_id: String,
    pub answer: String,
    pub answered_at: DateTime<Utc>,
}

/// Session lifecycle marker, written as the first line of a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// One line of a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionRecord {
    Session(SessionMarker),
    Question(Question),
    Answer(AnswerEvent),
}

/// Directory holding one JSONL log per session.
pub fn sessions_dir(project_root: &Path) -> PathBuf {
    project_root.join(".telegram-mcp").join("sessions")
}
