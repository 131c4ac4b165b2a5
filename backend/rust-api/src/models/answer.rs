use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    pub question_id: String,
    pub option_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitOutcome {
    pub accepted: bool,
    pub is_correct: bool,
    /// The question already had a recorded answer; nothing was changed
    pub already_answered: bool,
}

/// One immutable answer per (attempt, question).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerRecord {
    pub attempt_id: String,
    pub question_id: String,
    /// `None` for the locked record written when a question timer runs out
    pub selected_option: Option<u32>,
    pub is_correct: bool,
    pub recorded_at: DateTime<Utc>,
    pub reason: Option<AnswerFailureReason>,
}

impl AnswerRecord {
    pub fn timeout(attempt_id: &str, question_id: &str, recorded_at: DateTime<Utc>) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            question_id: question_id.to_string(),
            selected_option: None,
            is_correct: false,
            recorded_at,
            reason: Some(AnswerFailureReason::Timeout),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerFailureReason {
    WrongAnswer,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct RetryPendingResponse {
    pub flushed: usize,
    pub pending: usize,
}
