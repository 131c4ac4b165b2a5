use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

pub mod answer;
pub mod content;
pub mod hint;
pub mod timer;

/// One learner's timed run through one scenario.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attempt {
    pub id: String,
    pub learner_id: String,
    pub scenario_id: String,
    /// Normalised learner role, fixes which questions count towards the total
    pub role: String,
    pub status: AttemptStatus,
    pub time_limit_seconds: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub correct_count: Option<u32>,
    pub total_count: Option<u32>,
    pub score: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    pub fn is_armed(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Finalized,
    Abandoned,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Finalized => "finalized",
            AttemptStatus::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row handed to the attempt store on creation. Timing fields start unset.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub learner_id: String,
    pub scenario_id: String,
    pub role: String,
    pub time_limit_seconds: Option<u32>,
    pub created_at: DateTime<Utc>,
}

/// Terminal fields written by the finalizer in one conditional update.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeFields {
    pub status: AttemptStatus,
    pub finished_at: DateTime<Utc>,
    pub correct_count: u32,
    pub total_count: u32,
    pub score: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAttemptRequest {
    #[validate(length(min = 1, max = 128))]
    pub learner_id: String,
    #[validate(length(min = 1, max = 128))]
    pub scenario_id: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Custom budget; only honoured for privileged callers
    #[validate(range(min = 1, max = 600))]
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
    #[serde(default)]
    pub privileged: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAttemptResponse {
    pub attempt_id: String,
    pub resumed: bool,
    pub time_limit_seconds: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArmOutcome {
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// False when another caller armed the attempt first
    pub armed_now: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct FinishRequest {
    #[serde(default)]
    pub status: Option<AttemptStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinishOutcome {
    pub attempt_id: String,
    pub score: u32,
    pub correct_count: u32,
    pub total_count: u32,
    pub status: AttemptStatus,
    /// True when this call found the attempt already terminal
    pub superseded: bool,
}

impl FinishOutcome {
    /// Reads the persisted terminal result back from a row.
    pub fn from_terminal(attempt: &Attempt) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            score: attempt.score.unwrap_or(0),
            correct_count: attempt.correct_count.unwrap_or(0),
            total_count: attempt.total_count.unwrap_or(0),
            status: attempt.status,
            superseded: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub attempt: Attempt,
    pub was_already_expired: bool,
    pub total_questions: usize,
    pub answers: Vec<answer::AnswerRecord>,
    pub hints: Vec<hint::HintUsage>,
    pub pending_answers: usize,
    pub remaining_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub learner_id: String,
    pub scenario_id: String,
}

#[derive(Debug, Serialize)]
pub struct AttemptSummary {
    pub id: String,
    pub status: AttemptStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub correct_count: Option<u32>,
    pub total_count: Option<u32>,
    pub score: Option<u32>,
}

impl From<&Attempt> for AttemptSummary {
    fn from(attempt: &Attempt) -> Self {
        Self {
            id: attempt.id.clone(),
            status: attempt.status,
            started_at: attempt.started_at,
            finished_at: attempt.finished_at,
            correct_count: attempt.correct_count,
            total_count: attempt.total_count,
            score: attempt.score,
        }
    }
}
