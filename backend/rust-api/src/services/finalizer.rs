use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::EngineError;
use crate::metrics::{ATTEMPTS_TOTAL, FINALIZE_TOTAL};
use crate::models::{Attempt, AttemptStatus, FinalizeFields, FinishOutcome};
use crate::storage::{
    AnswerStore, AttemptStore, HintUsageStore, ScenarioContentProvider, StoreError,
};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Who is closing the attempt; decides the terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    /// Learner pressed finish. `None` or a non-terminal status means `finalized`,
    /// unless the deadline has already passed.
    Manual(Option<AttemptStatus>),
    /// Deadline passed: `finalized` if every question has an answer, else `abandoned`.
    Expiry,
}

/// `max(0, round(100 * correct / total - penalty * hints))`, 0 when there are no questions.
pub fn compute_score(correct: u32, total: u32, hints_used: u32, penalty_points: u32) -> u32 {
    let base = if total == 0 {
        0.0
    } else {
        100.0 * f64::from(correct) / f64::from(total)
    };
    let penalty = f64::from(penalty_points) * f64::from(hints_used);
    (base - penalty).round().max(0.0) as u32
}

pub fn completion_status(answered: usize, total: usize) -> AttemptStatus {
    if answered >= total {
        AttemptStatus::Finalized
    } else {
        AttemptStatus::Abandoned
    }
}

/// Moves an attempt to its terminal state exactly once.
///
/// The score is computed from what the stores hold, so every trigger path
/// (and every process) derives the same result. The write only applies while
/// the row is still `in_progress`; a caller that loses the race reads the
/// winner's row back.
pub struct Finalizer {
    attempts: Arc<dyn AttemptStore>,
    answers: Arc<dyn AnswerStore>,
    hints: Arc<dyn HintUsageStore>,
    content: Arc<dyn ScenarioContentProvider>,
    penalty_points: u32,
}

struct Tally {
    total: u32,
    answered: usize,
    correct: u32,
    hints_used: u32,
}

impl Finalizer {
    pub fn new(
        attempts: Arc<dyn AttemptStore>,
        answers: Arc<dyn AnswerStore>,
        hints: Arc<dyn HintUsageStore>,
        content: Arc<dyn ScenarioContentProvider>,
        penalty_points: u32,
    ) -> Self {
        Self {
            attempts,
            answers,
            hints,
            content,
            penalty_points,
        }
    }

    pub async fn finalize(
        &self,
        attempt: &Attempt,
        trigger: FinalizeTrigger,
        now: DateTime<Utc>,
    ) -> Result<FinishOutcome, EngineError> {
        if attempt.status.is_terminal() {
            FINALIZE_TOTAL.with_label_values(&["superseded"]).inc();
            return Ok(FinishOutcome::from_terminal(attempt));
        }

        let result = self.try_finalize(attempt, trigger, now).await;
        if let Err(e) = &result {
            FINALIZE_TOTAL.with_label_values(&["failed"]).inc();
            tracing::warn!(
                "Finalize failed for attempt {}, it stays in progress: {}",
                attempt.id,
                e
            );
        }
        result
    }

    async fn try_finalize(
        &self,
        attempt: &Attempt,
        trigger: FinalizeTrigger,
        now: DateTime<Utc>,
    ) -> Result<FinishOutcome, EngineError> {
        let tally = self.tally(attempt).await?;

        // Past the deadline only completeness counts, whoever closes the attempt
        let status = match trigger {
            _ if attempt.is_expired_at(now) => {
                completion_status(tally.answered, tally.total as usize)
            }
            FinalizeTrigger::Manual(Some(status)) if status.is_terminal() => status,
            FinalizeTrigger::Manual(_) => AttemptStatus::Finalized,
            FinalizeTrigger::Expiry => completion_status(tally.answered, tally.total as usize),
        };
        let score = compute_score(
            tally.correct,
            tally.total,
            tally.hints_used,
            self.penalty_points,
        );

        let fields = FinalizeFields {
            status,
            finished_at: now,
            correct_count: tally.correct,
            total_count: tally.total,
            score,
        };

        let applied = retry_async_with_config(RetryConfig::aggressive(), || async {
            self.attempts
                .update_if_in_progress(&attempt.id, fields.clone())
                .await
        })
        .await?;

        if applied {
            FINALIZE_TOTAL.with_label_values(&["applied"]).inc();
            ATTEMPTS_TOTAL.with_label_values(&[status.as_str()]).inc();
            tracing::info!(
                "Attempt {} {}: score={}, correct={}/{}, hints={}",
                attempt.id,
                status,
                score,
                tally.correct,
                tally.total,
                tally.hints_used
            );
            return Ok(FinishOutcome {
                attempt_id: attempt.id.clone(),
                score,
                correct_count: tally.correct,
                total_count: tally.total,
                status,
                superseded: false,
            });
        }

        let current = self
            .attempts
            .get_attempt(&attempt.id)
            .await?
            .ok_or_else(|| EngineError::AttemptNotFound(attempt.id.clone()))?;

        if !current.status.is_terminal() {
            return Err(EngineError::Persistence(StoreError::Backend(anyhow!(
                "terminal update for attempt {} was not applied",
                attempt.id
            ))));
        }

        FINALIZE_TOTAL.with_label_values(&["superseded"]).inc();
        tracing::debug!(
            "Attempt {} was already {}, keeping the stored result",
            attempt.id,
            current.status
        );
        Ok(FinishOutcome::from_terminal(&current))
    }

    async fn tally(&self, attempt: &Attempt) -> Result<Tally, EngineError> {
        let questions = self
            .content
            .get_questions(&attempt.scenario_id, &attempt.role)
            .await?;
        let visible: HashSet<&str> = questions.iter().map(|q| q.id.as_str()).collect();

        let answers = self.answers.list_answers(&attempt.id).await?;
        let counted: Vec<_> = answers
            .iter()
            .filter(|a| visible.contains(a.question_id.as_str()))
            .collect();

        let usage = self.hints.usage(&attempt.id).await?;
        let hints_used: u32 = usage
            .iter()
            .filter(|(question_id, _)| visible.contains(question_id.as_str()))
            .map(|(_, used)| *used)
            .sum();

        Ok(Tally {
            total: u32::try_from(visible.len()).unwrap_or(u32::MAX),
            answered: counted.len(),
            correct: u32::try_from(counted.iter().filter(|a| a.is_correct).count())
                .unwrap_or(u32::MAX),
            hints_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_subtracts_hint_penalty() {
        assert_eq!(compute_score(7, 10, 3, 5), 55);
    }

    #[test]
    fn score_is_clamped_at_zero() {
        assert_eq!(compute_score(1, 10, 4, 5), 0);
    }

    #[test]
    fn score_rounds_half_up() {
        // 100 * 2 / 3 = 66.67
        assert_eq!(compute_score(2, 3, 0, 5), 67);
        // 100 * 1 / 8 = 12.5
        assert_eq!(compute_score(1, 8, 0, 5), 13);
    }

    #[test]
    fn empty_scenario_scores_zero() {
        assert_eq!(compute_score(0, 0, 0, 5), 0);
    }

    #[test]
    fn completeness_decides_expiry_status() {
        assert_eq!(completion_status(5, 5), AttemptStatus::Finalized);
        assert_eq!(completion_status(3, 5), AttemptStatus::Abandoned);
        assert_eq!(completion_status(0, 0), AttemptStatus::Finalized);
    }
}
