use std::path::Path;

use crate::error::{Result, TelegramMcpError};
use crate::storage::queue::SessionStore;
use crate::storage::QuestionStatus;

/// List pending questions across every session in the project.
pub fn run_queue(project_root: &Path) -> Result<()> {
    let store = SessionStore::new(project_root);
    let pending = store.load_all_pending()?;

    if pending.is_empty() {
        println!("No pending questions.");
        return Ok(());
    }

    for question in &pending {
        println!(
            "ID: {}\n  Session: {}\n  Question: {}\n  Context: {}\n  Asked: {}\n",
            question.id,
            question.session_id,
            truncate(&question.question, 80),
            question.context.as_deref().unwrap_or("-"),
            question.created_at,
        );
    }

    println!("{} pending question(s)", pending.len());
    Ok(())
}

/// List session logs discovered on disk, with per-session counts.
pub fn run_sessions(project_root: &Path) -> Result<()> {
    let store = SessionStore::new(project_root);
    let sessions = store.discover_sessions()?;

    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    for session in &sessions {
        let questions = store.load_questions(&session.id)?;
        let pending = questions
            .iter()
            .filter(|q| q.status == QuestionStatus::Pending)
            .count();
        println!(
            "{}  {}  {} question(s), {} pending",
            session.id,
            session.label,
            questions.len(),
            pending,
        );
    }
    Ok(())
}

/// Answer a pending question: flips it to answered in place and appends the
/// answer event. This is the same write the messaging channel integration
/// performs when a user replies.
pub async fn run_answer(project_root: &Path, question_id: &str, answer: &str) -> Result<()> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(TelegramMcpError::Validation {
            reason: "answer cannot be empty".into(),
        });
    }

    let store = SessionStore::new(project_root);
    let question = store.find_question_any_session(question_id)?.ok_or_else(|| {
        TelegramMcpError::QuestionNotFound {
            question_id: question_id.to_string(),
        }
    })?;

    store
        .record_answer(&question.session_id, question_id, answer)
        .await?;
    eprintln!("telegram-mcp: answered {}", question_id);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
