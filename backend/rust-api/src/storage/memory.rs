//! In-process stores with the same conditional-write semantics as the
//! MongoDB/Redis backends. Used by tests and the `memory` storage mode.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{
    visible_steps, AnswerStore, AttemptStore, HintUsageStore, ScenarioContentProvider, StoreError,
};
use crate::models::answer::{AnswerRecord, InsertOutcome};
use crate::models::content::{Scenario, Step};
use crate::models::{Attempt, AttemptStatus, FinalizeFields, NewAttempt};
use crate::utils::lock;

/// Switch for simulating an unreachable backend.
#[derive(Debug, Default)]
struct FailureSwitch(AtomicBool);

impl FailureSwitch {
    fn set(&self, fail: bool) {
        self.0.store(fail, Ordering::SeqCst);
    }

    fn check(&self, operation: &str) -> Result<(), StoreError> {
        if self.0.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!(
                "simulated store outage during {}",
                operation
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    rows: Mutex<HashMap<String, Attempt>>,
    fail_writes: FailureSwitch,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    /// Seeds a row as-is, bypassing creation rules.
    pub fn put(&self, attempt: Attempt) {
        lock(&self.rows).insert(attempt.id.clone(), attempt);
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<String, StoreError> {
        self.fail_writes.check("create_attempt")?;
        let mut rows = lock(&self.rows);

        let open_exists = rows.values().any(|a| {
            a.learner_id == attempt.learner_id
                && a.scenario_id == attempt.scenario_id
                && a.status == AttemptStatus::InProgress
        });
        if open_exists {
            return Err(StoreError::OpenAttemptExists);
        }

        let id = Uuid::new_v4().to_string();
        rows.insert(
            id.clone(),
            Attempt {
                id: id.clone(),
                learner_id: attempt.learner_id,
                scenario_id: attempt.scenario_id,
                role: attempt.role,
                status: AttemptStatus::InProgress,
                time_limit_seconds: attempt.time_limit_seconds,
                started_at: None,
                expires_at: None,
                finished_at: None,
                correct_count: None,
                total_count: None,
                score: None,
                created_at: attempt.created_at,
            },
        );
        Ok(id)
    }

    async fn arm_if_unset(
        &self,
        attempt_id: &str,
        started_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        self.fail_writes.check("arm_if_unset")?;
        let mut rows = lock(&self.rows);
        match rows.get_mut(attempt_id) {
            Some(row) if row.started_at.is_none() && row.status == AttemptStatus::InProgress => {
                row.started_at = Some(started_at);
                row.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        Ok(lock(&self.rows).get(attempt_id).cloned())
    }

    async fn update_if_in_progress(
        &self,
        attempt_id: &str,
        fields: FinalizeFields,
    ) -> Result<bool, StoreError> {
        self.fail_writes.check("update_if_in_progress")?;
        let mut rows = lock(&self.rows);
        match rows.get_mut(attempt_id) {
            Some(row) if row.status == AttemptStatus::InProgress => {
                row.status = fields.status;
                row.finished_at = Some(fields.finished_at);
                row.correct_count = Some(fields.correct_count);
                row.total_count = Some(fields.total_count);
                row.score = Some(fields.score);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_open_attempt(
        &self,
        learner_id: &str,
        scenario_id: &str,
    ) -> Result<Option<Attempt>, StoreError> {
        Ok(lock(&self.rows)
            .values()
            .filter(|a| {
                a.learner_id == learner_id
                    && a.scenario_id == scenario_id
                    && a.status == AttemptStatus::InProgress
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn list_attempts(
        &self,
        learner_id: &str,
        scenario_id: &str,
    ) -> Result<Vec<Attempt>, StoreError> {
        let mut attempts: Vec<Attempt> = lock(&self.rows)
            .values()
            .filter(|a| a.learner_id == learner_id && a.scenario_id == scenario_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(attempts)
    }
}

#[derive(Debug, Default)]
pub struct MemoryAnswerStore {
    rows: Mutex<HashMap<(String, String), AnswerRecord>>,
    fail_writes: FailureSwitch,
}

impl MemoryAnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }
}

#[async_trait]
impl AnswerStore for MemoryAnswerStore {
    async fn insert_if_absent(&self, record: &AnswerRecord) -> Result<InsertOutcome, StoreError> {
        self.fail_writes.check("insert_if_absent")?;
        let key = (record.attempt_id.clone(), record.question_id.clone());
        let mut rows = lock(&self.rows);
        if rows.contains_key(&key) {
            return Ok(InsertOutcome { created: false });
        }
        rows.insert(key, record.clone());
        Ok(InsertOutcome { created: true })
    }

    async fn list_answers(&self, attempt_id: &str) -> Result<Vec<AnswerRecord>, StoreError> {
        let mut answers: Vec<AnswerRecord> = lock(&self.rows)
            .values()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(answers)
    }
}

#[derive(Debug, Default)]
pub struct MemoryHintStore {
    counts: Mutex<HashMap<String, HashMap<String, u32>>>,
    fail_writes: FailureSwitch,
}

impl MemoryHintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }
}

#[async_trait]
impl HintUsageStore for MemoryHintStore {
    async fn increment_if_below(
        &self,
        attempt_id: &str,
        question_id: &str,
        cap: u32,
    ) -> Result<Option<u32>, StoreError> {
        self.fail_writes.check("increment_if_below")?;
        let mut counts = lock(&self.counts);
        let used = counts
            .entry(attempt_id.to_string())
            .or_default()
            .entry(question_id.to_string())
            .or_insert(0);
        if *used >= cap {
            return Ok(None);
        }
        *used += 1;
        Ok(Some(*used))
    }

    async fn usage(&self, attempt_id: &str) -> Result<HashMap<String, u32>, StoreError> {
        Ok(lock(&self.counts)
            .get(attempt_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct MemoryContentProvider {
    scenarios: Mutex<HashMap<String, Scenario>>,
}

impl MemoryContentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scenarios(scenarios: Vec<Scenario>) -> Self {
        let provider = Self::new();
        for scenario in scenarios {
            provider.insert(scenario);
        }
        provider
    }

    /// Loads a JSON array of scenarios.
    pub fn from_json_file(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read content file {}", path))?;
        let scenarios: Vec<Scenario> =
            serde_json::from_str(&raw).context("Failed to parse scenario content")?;
        Ok(Self::with_scenarios(scenarios))
    }

    pub fn insert(&self, scenario: Scenario) {
        lock(&self.scenarios).insert(scenario.id.clone(), scenario);
    }
}

#[async_trait]
impl ScenarioContentProvider for MemoryContentProvider {
    async fn get_steps(&self, scenario_id: &str, role: &str) -> Result<Vec<Step>, StoreError> {
        let steps = lock(&self.scenarios)
            .get(scenario_id)
            .map(|s| s.steps.clone())
            .unwrap_or_default();
        Ok(visible_steps(steps, role))
    }

    async fn estimated_minutes(&self, scenario_id: &str) -> Result<Option<u32>, StoreError> {
        Ok(lock(&self.scenarios)
            .get(scenario_id)
            .and_then(|s| s.estimated_minutes))
    }
}
