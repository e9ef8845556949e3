use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Result, TelegramMcpError};
use crate::storage::file_lock::with_lock;
use crate::storage::{
    sessions_dir, AnswerEvent, Question, QuestionStatus, SessionMarker, SessionRecord,
};

/// Durable per-session question queue backed by line-delimited JSON logs.
///
/// One file per session. Appends and rewrites are serialized by an advisory
/// lock scoped to that file; rewrites go through a temp file plus rename so
/// readers never observe a half-written log.
#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions_dir: PathBuf,
}

impl SessionStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            sessions_dir: sessions_dir(project_root),
        }
    }

    /// Path of the log file for one session.
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{session_id}.jsonl"))
    }

    // ------------------------------------------------------------------
    // Core operations
    // ------------------------------------------------------------------

    /// Append one record as a new line, under the session's file lock.
    pub async fn append(&self, session_id: &str, record: &SessionRecord) -> Result<()> {
        let path = self.session_path(session_id);
        with_lock(&path, async { append_record(&path, record) }).await
    }

    /// Read the whole log. Malformed lines are logged and skipped, never
    /// fatal; a missing file reads as empty. File order is preserved.
    pub fn load_all(&self, session_id: &str) -> Result<Vec<SessionRecord>> {
        read_records(&self.session_path(session_id))
    }

    /// Load, transform, and atomically replace the log, all under the lock.
    ///
    /// `transform` is pure: it receives the current records and produces the
    /// full new list. Every mutation of an existing record goes through here.
    pub async fn rewrite_in_place<F>(&self, session_id: &str, transform: F) -> Result<()>
    where
        F: FnOnce(Vec<SessionRecord>) -> Result<Vec<SessionRecord>>,
    {
        let path = self.session_path(session_id);
        with_lock(&path, async {
            let records = read_records(&path)?;
            let next = transform(records)?;
            write_atomic(&path, &next)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Question operations
    // ------------------------------------------------------------------

    /// Create the session log with its lifecycle marker as the first line.
    pub async fn create_session(&self, session_id: &str, label: &str) -> Result<SessionMarker> {
        let marker = SessionMarker {
            id: session_id.to_string(),
            label: label.to_string(),
            created_at: Utc::now(),
        };
        self.append(session_id, &SessionRecord::Session(marker.clone()))
            .await?;
        Ok(marker)
    }

    /// Append a new pending question and return it fully populated.
    pub async fn append_question(
        &self,
        session_id: &str,
        question: &str,
        context: Option<String>,
        conversation_id: Option<String>,
    ) -> Result<Question> {
        let q = Question {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            question: question.to_string(),
            context,
            conversation_id,
            status: QuestionStatus::Pending,
            created_at: Utc::now(),
            answer: None,
            answered_at: None,
        };
        self.append(session_id, &SessionRecord::Question(q.clone()))
            .await?;
        Ok(q)
    }

    /// All question records for a session, in file order.
    pub fn load_questions(&self, session_id: &str) -> Result<Vec<Question>> {
        Ok(self
            .load_all(session_id)?
            .into_iter()
            .filter_map(|record| match record {
                SessionRecord::Question(q) => Some(q),
                _ => None,
            })
            .collect())
    }

    pub fn load_pending_questions(&self, session_id: &str) -> Result<Vec<Question>> {
        Ok(self
            .load_questions(session_id)?
            .into_iter()
            .filter(|q| q.status == QuestionStatus::Pending)
            .collect())
    }

    /// Count of not-yet-answered questions in a session.
    pub fn pending_count(&self, session_id: &str) -> Result<usize> {
        Ok(self.load_pending_questions(session_id)?.len())
    }

    /// Look up one question by id within a session.
    pub fn find_question(&self, session_id: &str, question_id: &str) -> Result<Option<Question>> {
        Ok(self
            .load_questions(session_id)?
            .into_iter()
            .find(|q| q.id == question_id))
    }

    /// Flip a pending question to answered in place and append the audit
    /// event, as one atomic rewrite. A question is answered exactly once.
    pub async fn record_answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<()> {
        let answered_at = Utc::now();
        let qid = question_id.to_string();
        let answer = answer.to_string();

        self.rewrite_in_place(session_id, move |records| {
            let mut found = false;
            let mut next: Vec<SessionRecord> = Vec::with_capacity(records.len() + 1);
            for record in records {
                match record {
                    SessionRecord::Question(mut q) if q.id == qid => {
                        if q.status == QuestionStatus::Answered {
                            return Err(TelegramMcpError::AlreadyAnswered {
                                question_id: qid.clone(),
                            });
                        }
                        q.status = QuestionStatus::Answered;
                        q.answer = Some(answer.clone());
                        q.answered_at = Some(answered_at);
                        found = true;
                        next.push(SessionRecord::Question(q));
                    }
                    other => next.push(other),
                }
            }
            if !found {
                return Err(TelegramMcpError::QuestionNotFound {
                    question_id: qid.clone(),
                });
            }
            next.push(SessionRecord::Answer(AnswerEvent {
                question_id: qid,
                answer,
                answered_at,
            }));
            Ok(next)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Cross-session queries
    // ------------------------------------------------------------------

    /// Scan the sessions directory for logs. Logs missing their lifecycle
    /// marker get one synthesized from the file name.
    pub fn discover_sessions(&self) -> Result<Vec<SessionMarker>> {
        if !self.sessions_dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.sessions_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let marker = read_records(&path)?
                .into_iter()
                .find_map(|record| match record {
                    SessionRecord::Session(marker) => Some(marker),
                    _ => None,
                })
                .unwrap_or_else(|| SessionMarker {
                    id: stem.to_string(),
                    label: stem.to_string(),
                    created_at: chrono::DateTime::UNIX_EPOCH,
                });
            sessions.push(marker);
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// All pending questions across every session, for the operator views.
    pub fn load_all_pending(&self) -> Result<Vec<Question>> {
        let mut pending = Vec::new();
        for session in self.discover_sessions()? {
            pending.extend(self.load_pending_questions(&session.id)?);
        }
        Ok(pending)
    }

    /// Find a question by id without knowing its session.
    pub fn find_question_any_session(&self, question_id: &str) -> Result<Option<Question>> {
        for session in self.discover_sessions()? {
            if let Some(q) = self.find_question(&session.id, question_id)? {
                return Ok(Some(q));
            }
        }
        Ok(None)
    }

    /// Records belonging to one conversation, in chronological order.
    pub fn load_conversation(
        &self,
        session_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<Question>> {
        let mut matching: Vec<Question> = self
            .load_questions(session_id)?
            .into_iter()
            .filter(|q| q.conversation_id.as_deref() == Some(conversation_id))
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}

// ----------------------------------------------------------------------
// File helpers
// ----------------------------------------------------------------------

fn append_record(path: &Path, record: &SessionRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(record)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

fn read_records(path: &Path) -> Result<Vec<SessionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionRecord>(trimmed) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    "skipping malformed line {} in {}: {}",
                    line_num + 1,
                    path.display(),
                    e
                );
            }
        }
    }

    Ok(records)
}

/// Write the full record list to a temp sibling, fsync, and rename over the
/// original, so concurrent readers only ever see a complete file.
fn write_atomic(path: &Path, records: &[SessionRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)?;
        for record in records {
            let json = serde_json::to_string(record)?;
            writeln!(file, "{}", json)?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}
