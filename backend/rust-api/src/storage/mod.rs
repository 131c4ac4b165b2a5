//! Narrow persistence contracts consumed by the engine.
//!
//! Every write here is a single-row conditional operation; the engine never
//! relies on multi-row transactions or explicit locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::models::answer::{AnswerRecord, InsertOutcome};
use crate::models::content::{Question, Step};
use crate::models::{Attempt, FinalizeFields, NewAttempt};

pub mod memory;
pub mod mongo;
pub mod redis_hints;

pub use memory::{MemoryAnswerStore, MemoryAttemptStore, MemoryContentProvider, MemoryHintStore};
pub use mongo::{MongoAnswerStore, MongoAttemptStore, MongoContentProvider};
pub use redis_hints::RedisHintStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("An attempt for this learner and scenario is already in progress")]
    OpenAttemptExists,

    #[error("Store operation failed: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Inserts an unarmed `in_progress` attempt. Fails with
    /// [`StoreError::OpenAttemptExists`] if one is already open for the pair.
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<String, StoreError>;

    /// Sets `started_at`/`expires_at` only if `started_at` is still unset.
    /// Returns true when this call performed the arm.
    async fn arm_if_unset(
        &self,
        attempt_id: &str,
        started_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError>;

    /// Applies the terminal fields only if the attempt is still `in_progress`.
    async fn update_if_in_progress(
        &self,
        attempt_id: &str,
        fields: FinalizeFields,
    ) -> Result<bool, StoreError>;

    async fn find_open_attempt(
        &self,
        learner_id: &str,
        scenario_id: &str,
    ) -> Result<Option<Attempt>, StoreError>;

    /// All attempts of a learner on a scenario, newest first.
    async fn list_attempts(
        &self,
        learner_id: &str,
        scenario_id: &str,
    ) -> Result<Vec<Attempt>, StoreError>;
}

#[async_trait]
pub trait AnswerStore: Send + Sync {
    /// Writes the answer unless one already exists for (attempt, question).
    async fn insert_if_absent(&self, record: &AnswerRecord) -> Result<InsertOutcome, StoreError>;

    async fn list_answers(&self, attempt_id: &str) -> Result<Vec<AnswerRecord>, StoreError>;
}

#[async_trait]
pub trait HintUsageStore: Send + Sync {
    /// Atomically bumps the count for (attempt, question) unless it already
    /// reached `cap`. Returns the new count, or `None` when capped.
    async fn increment_if_below(
        &self,
        attempt_id: &str,
        question_id: &str,
        cap: u32,
    ) -> Result<Option<u32>, StoreError>;

    /// Hints used per question id.
    async fn usage(&self, attempt_id: &str) -> Result<HashMap<String, u32>, StoreError>;
}

/// Read-only scenario content authored elsewhere.
#[async_trait]
pub trait ScenarioContentProvider: Send + Sync {
    /// Steps in display order, already filtered to what `role` may see.
    async fn get_steps(&self, scenario_id: &str, role: &str) -> Result<Vec<Step>, StoreError>;

    async fn estimated_minutes(&self, scenario_id: &str) -> Result<Option<u32>, StoreError>;

    async fn get_questions(
        &self,
        scenario_id: &str,
        role: &str,
    ) -> Result<Vec<Question>, StoreError> {
        let steps = self.get_steps(scenario_id, role).await?;
        Ok(steps.into_iter().flat_map(|s| s.questions).collect())
    }
}

/// Shared by backends: orders steps and applies role visibility.
pub(crate) fn visible_steps(mut steps: Vec<Step>, role: &str) -> Vec<Step> {
    steps.sort_by_key(|s| s.step_order);
    steps
        .iter()
        .filter_map(|s| s.visible_for(role))
        .collect()
}
