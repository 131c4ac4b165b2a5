use thiserror::Error;

use crate::models::AttemptStatus;
use crate::storage::StoreError;

/// Rejections surfaced by the session engine.
///
/// Retried answers and racing finalizers are not errors; they are reported
/// through `SubmitOutcome::already_answered` and `FinishOutcome::superseded`.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Attempt {0} not found")]
    AttemptNotFound(String),

    #[error("Attempt is not active (status: {status})")]
    AttemptNotActive { status: AttemptStatus },

    #[error("Attempt has not been started yet")]
    AttemptNotArmed,

    #[error("Only {answered} of {total} questions answered; finish as abandoned or keep going")]
    AttemptIncomplete { answered: usize, total: usize },

    #[error("Attempt time limit exceeded")]
    TimeExpired,

    #[error("Question {0} time limit exceeded")]
    QuestionExpired(String),

    #[error("Step {0} does not exist in this attempt")]
    StepNotFound(usize),

    #[error("Question {0} not found in this attempt")]
    QuestionNotFound(String),

    #[error("Option {option} is out of range for question {question_id}")]
    InvalidOption { question_id: String, option: u32 },

    #[error("Maximum number of attempts reached ({limit})")]
    AttemptLimitReached { limit: u32 },

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl EngineError {
    /// Failures the learner can resolve by retrying the same action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Persistence(_))
    }
}
