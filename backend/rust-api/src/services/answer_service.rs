use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::EngineError;
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, ANSWER_PERSIST_FAILURES_TOTAL};
use crate::models::answer::{
    AnswerFailureReason, AnswerRecord, RetryPendingResponse, SubmitOutcome,
};
use crate::models::content::Question;
use crate::storage::{AnswerStore, StoreError};
use crate::utils::lock;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

#[derive(Debug, Default)]
struct RecorderState {
    answers: HashMap<String, AnswerRecord>,
    pending: Vec<AnswerRecord>,
}

/// One answer per question, written insert-if-absent.
///
/// Local state is updated before the store write. A write that still fails
/// after retries leaves the answer in place and queues it as pending.
pub struct AnswerRecorder {
    attempt_id: String,
    store: Arc<dyn AnswerStore>,
    retry: RetryConfig,
    state: Mutex<RecorderState>,
}

impl AnswerRecorder {
    pub fn new(attempt_id: &str, store: Arc<dyn AnswerStore>, retry: RetryConfig) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            store,
            retry,
            state: Mutex::new(RecorderState::default()),
        }
    }

    /// Adopts answers already persisted for this attempt.
    pub fn seed(&self, records: Vec<AnswerRecord>) {
        let mut state = lock(&self.state);
        for record in records {
            state.answers.insert(record.question_id.clone(), record);
        }
    }

    pub fn get(&self, question_id: &str) -> Option<AnswerRecord> {
        lock(&self.state).answers.get(question_id).cloned()
    }

    pub fn is_answered(&self, question_id: &str) -> bool {
        lock(&self.state).answers.contains_key(question_id)
    }

    pub fn answered_count(&self) -> usize {
        lock(&self.state).answers.len()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn snapshot(&self) -> Vec<AnswerRecord> {
        let mut answers: Vec<AnswerRecord> = lock(&self.state).answers.values().cloned().collect();
        answers.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        answers
    }

    pub async fn submit(
        &self,
        question: &Question,
        option_index: u32,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, EngineError> {
        if option_index as usize >= question.options.len() {
            return Err(EngineError::InvalidOption {
                question_id: question.id.clone(),
                option: option_index,
            });
        }

        let is_correct = question.is_correct(option_index);
        let record = AnswerRecord {
            attempt_id: self.attempt_id.clone(),
            question_id: question.id.clone(),
            selected_option: Some(option_index),
            is_correct,
            recorded_at: now,
            reason: (!is_correct).then_some(AnswerFailureReason::WrongAnswer),
        };

        if let Some(existing) = self.stage(&record) {
            tracing::debug!(
                "Question {} already answered in attempt {}, ignoring resubmission",
                question.id,
                self.attempt_id
            );
            return Ok(SubmitOutcome {
                accepted: true,
                is_correct: existing.is_correct,
                already_answered: true,
            });
        }

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if is_correct { "true" } else { "false" }])
            .inc();

        match self.persist(&record).await {
            Ok(true) => {
                tracing::info!(
                    "Answer recorded: attempt={}, question={}, correct={}",
                    self.attempt_id,
                    question.id,
                    is_correct
                );
                Ok(SubmitOutcome {
                    accepted: true,
                    is_correct,
                    already_answered: false,
                })
            }
            // Another process answered first; its choice is the one that counts
            Ok(false) => {
                let stored = self.adopt_stored(&question.id).await;
                Ok(SubmitOutcome {
                    accepted: true,
                    is_correct: stored.map(|r| r.is_correct).unwrap_or(is_correct),
                    already_answered: true,
                })
            }
            Err(e) => Err(self.keep_pending(record, e)),
        }
    }

    /// Writes the locked "no answer" record for questions whose timer ran out.
    /// Returns the ids that were newly locked.
    pub async fn lock_unanswered(
        &self,
        question_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, EngineError> {
        let mut locked = Vec::new();
        let mut failure = None;

        for question_id in question_ids {
            let record = AnswerRecord::timeout(&self.attempt_id, question_id, now);
            if self.stage(&record).is_some() {
                continue;
            }
            locked.push(question_id.clone());
            tracing::info!(
                "Question {} timed out in attempt {}, locked as incorrect",
                question_id,
                self.attempt_id
            );

            match self.persist(&record).await {
                Ok(true) => {}
                Ok(false) => {
                    self.adopt_stored(question_id).await;
                }
                Err(e) => failure = Some(self.keep_pending(record, e)),
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(locked),
        }
    }

    /// Re-sends every queued answer once (each with the normal retry policy).
    pub async fn retry_pending(&self) -> RetryPendingResponse {
        let queued = std::mem::take(&mut lock(&self.state).pending);
        let mut flushed = 0;

        for record in queued {
            match self.persist(&record).await {
                Ok(created) => {
                    if !created {
                        self.adopt_stored(&record.question_id).await;
                    }
                    flushed += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Pending answer for question {} still not saved: {}",
                        record.question_id,
                        e
                    );
                    lock(&self.state).pending.push(record);
                }
            }
        }

        let pending = self.pending_count();
        if flushed > 0 {
            tracing::info!(
                "Flushed {} pending answers for attempt {} ({} left)",
                flushed,
                self.attempt_id,
                pending
            );
        }
        RetryPendingResponse { flushed, pending }
    }

    /// Fails if any answer is still unsaved after one more flush.
    pub async fn flush_pending(&self) -> Result<(), EngineError> {
        if self.pending_count() == 0 {
            return Ok(());
        }
        let result = self.retry_pending().await;
        if result.pending > 0 {
            return Err(EngineError::Persistence(StoreError::Backend(anyhow::anyhow!(
                "{} answers could not be saved",
                result.pending
            ))));
        }
        Ok(())
    }

    /// Inserts into local state unless the question already has an answer,
    /// in which case the existing record is returned.
    fn stage(&self, record: &AnswerRecord) -> Option<AnswerRecord> {
        let mut state = lock(&self.state);
        if let Some(existing) = state.answers.get(&record.question_id) {
            return Some(existing.clone());
        }
        state
            .answers
            .insert(record.question_id.clone(), record.clone());
        None
    }

    async fn persist(&self, record: &AnswerRecord) -> Result<bool, StoreError> {
        let outcome = retry_async_with_config(self.retry.clone(), || async {
            self.store.insert_if_absent(record).await
        })
        .await?;
        Ok(outcome.created)
    }

    async fn adopt_stored(&self, question_id: &str) -> Option<AnswerRecord> {
        match self.store.list_answers(&self.attempt_id).await {
            Ok(rows) => {
                let stored = rows.into_iter().find(|r| r.question_id == question_id)?;
                lock(&self.state)
                    .answers
                    .insert(question_id.to_string(), stored.clone());
                Some(stored)
            }
            Err(e) => {
                tracing::warn!("Could not read back stored answer {}: {}", question_id, e);
                None
            }
        }
    }

    fn keep_pending(&self, record: AnswerRecord, error: StoreError) -> EngineError {
        ANSWER_PERSIST_FAILURES_TOTAL.inc();
        tracing::warn!(
            "Failed to save answer for question {} in attempt {}, kept locally: {}",
            record.question_id,
            self.attempt_id,
            error
        );
        lock(&self.state).pending.push(record);
        EngineError::Persistence(error)
    }
}
