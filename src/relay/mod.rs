use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TelegramMcpError};
use crate::storage::queue::SessionStore;
use crate::storage::{Question, QuestionStatus};

/// Fixed interval between long-poll reloads of the session log.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Hard ceiling on a single long-poll wait, seconds.
const MAX_WAIT_SECONDS: u64 = 300;
/// Default long-poll wait when the caller does not specify one, seconds.
const DEFAULT_WAIT_SECONDS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AskQuestionInput {
    #[schemars(description = "The question to relay to the user")]
    pub question: String,

    #[schemars(description = "Optional execution context (e.g., current task, plan phase)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[schemars(description = "Group id linking follow-up questions into one conversation")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[schemars(description = "Max minutes the caller intends to wait (default: 30)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_minutes: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskQuestionOutput {
    pub question_id: String,
    pub asked_at: DateTime<Utc>,
    pub status: QuestionStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CheckAnswersInput {
    #[schemars(description = "Specific question ids to check; empty checks all")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_ids: Option<Vec<String>>,

    #[schemars(description = "Long-poll wait in seconds (default: 60, max: 300); 0 checks once")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    pub question_id: String,
    pub question: String,
    pub answer: String,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAnswersOutput {
    pub answers: Vec<AnsweredQuestion>,
    /// Current count of not-yet-answered questions in the session,
    /// independent of the id filter.
    pub pending_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MarkAnsweredInput {
    #[schemars(description = "Id of the answered question to confirm")]
    pub question_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkAnsweredOutput {
    pub success: bool,
    /// Where the answered record lives: the session log path. Answered
    /// questions stay in place, nothing is moved.
    pub archived_to: String,
}

/// The three blocking-question operations, evaluated against one store.
#[derive(Debug, Clone)]
pub struct RelayService {
    store: SessionStore,
    poll_interval: Duration,
}

impl RelayService {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Override the long-poll reload interval. Tests use a short one.
    pub fn with_poll_interval(store: SessionStore, poll_interval: Duration) -> Self {
        Self {
            store,
            poll_interval,
        }
    }

    /// Create a pending question and return immediately. The blocking
    /// semantics live in the caller's later poll, not here.
    pub async fn ask(&self, session_id: &str, input: AskQuestionInput) -> Result<AskQuestionOutput> {
        let question = input.question.trim();
        if question.is_empty() {
            return Err(TelegramMcpError::Validation {
                reason: "question cannot be empty".into(),
            });
        }
        if let Some(minutes) = input.timeout_minutes {
            if !minutes.is_finite() || minutes <= 0.0 {
                return Err(TelegramMcpError::Validation {
                    reason: "timeout_minutes must be a positive number".into(),
                });
            }
        }
        let context = input
            .context
            .as_deref()
            .map(str::trim)
            .filter(|context| !context.is_empty())
            .map(String::from);

        let created = self
            .store
            .append_question(session_id, question, context, input.conversation_id)
            .await?;

        Ok(AskQuestionOutput {
            question_id: created.id,
            asked_at: created.created_at,
            status: created.status,
        })
    }

    /// Poll for answered questions, long-polling when `wait_seconds` > 0.
    ///
    /// Returns as soon as at least one match is answered; a full wait with no
    /// answers yields an empty list, which is an expected outcome, not an
    /// error.
    pub async fn check(
        &self,
        session_id: &str,
        input: CheckAnswersInput,
    ) -> Result<CheckAnswersOutput> {
        let question_ids: Vec<String> = input
            .question_ids
            .unwrap_or_default()
            .into_iter()
            .filter(|id| !id.trim().is_empty())
            .collect();
        let wait_seconds = effective_wait(input.wait_seconds);

        let answered = if wait_seconds > 0 {
            self.poll_for_answers(session_id, &question_ids, Duration::from_secs(wait_seconds))
                .await?
        } else {
            self.answered_matching(session_id, &question_ids)?
        };

        let pending_count = self.store.pending_count(session_id)?;

        let answers = answered
            .into_iter()
            .filter_map(|q| match (q.answer, q.answered_at) {
                (Some(answer), Some(answered_at)) => Some(AnsweredQuestion {
                    question_id: q.id,
                    question: q.question,
                    answer,
                    answered_at,
                }),
                // Answered without text is a data inconsistency; skip it here,
                // mark_question_answered reports it explicitly.
                _ => None,
            })
            .collect();

        Ok(CheckAnswersOutput {
            answers,
            pending_count,
        })
    }

    /// Confirm receipt of an already-answered question. Pure validation; the
    /// record itself is not touched.
    pub fn mark(&self, session_id: &str, input: MarkAnsweredInput) -> Result<MarkAnsweredOutput> {
        let question_id = input.question_id.trim();
        if question_id.is_empty() {
            return Err(TelegramMcpError::Validation {
                reason: "question_id cannot be empty".into(),
            });
        }

        let question = self
            .store
            .find_question(session_id, question_id)?
            .ok_or_else(|| TelegramMcpError::QuestionNotFound {
                question_id: question_id.to_string(),
            })?;

        if question.status != QuestionStatus::Answered {
            return Err(TelegramMcpError::QuestionNotAnswered {
                question_id: question_id.to_string(),
                status: question.status.to_string(),
            });
        }
        if question.answer.as_deref().map_or(true, str::is_empty) {
            return Err(TelegramMcpError::AnswerMissing {
                question_id: question_id.to_string(),
            });
        }

        Ok(MarkAnsweredOutput {
            success: true,
            archived_to: self.store.session_path(session_id).display().to_string(),
        })
    }

    async fn poll_for_answers(
        &self,
        session_id: &str,
        question_ids: &[String],
        budget: Duration,
    ) -> Result<Vec<Question>> {
        let start = Instant::now();
        loop {
            let answered = self.answered_matching(session_id, question_ids)?;
            if !answered.is_empty() {
                return Ok(answered);
            }

            let elapsed = start.elapsed();
            if elapsed >= budget {
                return Ok(Vec::new());
            }
            let remaining = budget - elapsed;
            if remaining < self.poll_interval {
                // Sleep exactly the remainder and do one final check; rounding
                // up to a full interval would overshoot the max-wait contract.
                tokio::time::sleep(remaining).await;
                return self.answered_matching(session_id, question_ids);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn answered_matching(&self, session_id: &str, question_ids: &[String]) -> Result<Vec<Question>> {
        Ok(self
            .store
            .load_questions(session_id)?
            .into_iter()
            .filter(|q| q.status == QuestionStatus::Answered)
            .filter(|q| question_ids.is_empty() || question_ids.iter().any(|id| id == &q.id))
            .collect())
    }
}

/// Default, then clamp to the hard maximum, regardless of caller input.
fn effective_wait(wait_seconds: Option<u64>) -> u64 {
    wait_seconds.unwrap_or(DEFAULT_WAIT_SECONDS).min(MAX_WAIT_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_defaults_to_sixty() {
        assert_eq!(effective_wait(None), 60);
    }

    #[test]
    fn wait_is_clamped_to_five_minutes() {
        assert_eq!(effective_wait(Some(9_999)), 300);
        assert_eq!(effective_wait(Some(300)), 300);
    }

    #[test]
    fn zero_wait_stays_zero() {
        assert_eq!(effective_wait(Some(0)), 0);
    }
}
