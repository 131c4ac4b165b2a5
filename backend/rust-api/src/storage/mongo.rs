use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime as BsonDateTime};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{visible_steps, AnswerStore, AttemptStore, ScenarioContentProvider, StoreError};
use crate::metrics::track_db_operation;
use crate::models::answer::{AnswerFailureReason, AnswerRecord, InsertOutcome};
use crate::models::content::{Question, Step};
use crate::models::{Attempt, AttemptStatus, FinalizeFields, NewAttempt};
use crate::utils::time::{bson_to_chrono, chrono_to_bson};

const ATTEMPTS: &str = "attempts";
const ANSWERS: &str = "attempt_answers";
const STEPS: &str = "steps";
const SCENARIOS: &str = "scenarios";

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}

/// Creates the indexes the conditional writes rely on. Safe to run on every boot.
pub async fn ensure_indexes(db: &Database) -> anyhow::Result<()> {
    let open_attempt = IndexModel::builder()
        .keys(doc! { "learner_id": 1, "scenario_id": 1 })
        .options(
            IndexOptions::builder()
                .name("one_open_attempt".to_string())
                .unique(true)
                .partial_filter_expression(doc! { "status": AttemptStatus::InProgress.as_str() })
                .build(),
        )
        .build();
    let history = IndexModel::builder()
        .keys(doc! { "learner_id": 1, "scenario_id": 1, "created_at": -1 })
        .build();
    db.collection::<AttemptDoc>(ATTEMPTS)
        .create_indexes(vec![open_attempt, history])
        .await
        .context("Failed to create attempt indexes")?;

    let answer_key = IndexModel::builder()
        .keys(doc! { "attempt_id": 1, "question_id": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build();
    db.collection::<AnswerDoc>(ANSWERS)
        .create_index(answer_key)
        .await
        .context("Failed to create answer index")?;

    let step_order = IndexModel::builder()
        .keys(doc! { "scenario_id": 1, "step_order": 1 })
        .build();
    db.collection::<StepDoc>(STEPS)
        .create_index(step_order)
        .await
        .context("Failed to create step index")?;

    tracing::info!("MongoDB indexes ensured");
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct AttemptDoc {
    #[serde(rename = "_id")]
    id: String,
    learner_id: String,
    scenario_id: String,
    #[serde(default)]
    role: String,
    status: AttemptStatus,
    time_limit_seconds: Option<i64>,
    started_at: Option<BsonDateTime>,
    expires_at: Option<BsonDateTime>,
    finished_at: Option<BsonDateTime>,
    correct_count: Option<i64>,
    total_count: Option<i64>,
    score: Option<i64>,
    created_at: BsonDateTime,
}

fn to_u32(value: Option<i64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

impl From<AttemptDoc> for Attempt {
    fn from(d: AttemptDoc) -> Self {
        Attempt {
            id: d.id,
            learner_id: d.learner_id,
            scenario_id: d.scenario_id,
            role: d.role,
            status: d.status,
            time_limit_seconds: to_u32(d.time_limit_seconds),
            started_at: d.started_at.map(bson_to_chrono),
            expires_at: d.expires_at.map(bson_to_chrono),
            finished_at: d.finished_at.map(bson_to_chrono),
            correct_count: to_u32(d.correct_count),
            total_count: to_u32(d.total_count),
            score: to_u32(d.score),
            created_at: bson_to_chrono(d.created_at),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AnswerDoc {
    attempt_id: String,
    question_id: String,
    selected_option: Option<i64>,
    is_correct: bool,
    recorded_at: BsonDateTime,
    reason: Option<AnswerFailureReason>,
}

impl From<AnswerDoc> for AnswerRecord {
    fn from(d: AnswerDoc) -> Self {
        AnswerRecord {
            attempt_id: d.attempt_id,
            question_id: d.question_id,
            selected_option: to_u32(d.selected_option),
            is_correct: d.is_correct,
            recorded_at: bson_to_chrono(d.recorded_at),
            reason: d.reason,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StepDoc {
    #[serde(rename = "_id")]
    id: String,
    scenario_id: String,
    step_order: i32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    questions: Vec<Question>,
}

#[derive(Debug, Deserialize)]
struct ScenarioDoc {
    estimated_minutes: Option<i64>,
}

pub struct MongoAttemptStore {
    attempts: Collection<AttemptDoc>,
}

impl MongoAttemptStore {
    pub fn new(db: &Database) -> Self {
        Self {
            attempts: db.collection(ATTEMPTS),
        }
    }
}

#[async_trait]
impl AttemptStore for MongoAttemptStore {
    async fn create_attempt(&self, attempt: NewAttempt) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let row = AttemptDoc {
            id: id.clone(),
            learner_id: attempt.learner_id,
            scenario_id: attempt.scenario_id,
            role: attempt.role,
            status: AttemptStatus::InProgress,
            time_limit_seconds: attempt.time_limit_seconds.map(i64::from),
            started_at: None,
            expires_at: None,
            finished_at: None,
            correct_count: None,
            total_count: None,
            score: None,
            created_at: chrono_to_bson(attempt.created_at),
        };

        let result = track_db_operation("insert_one", ATTEMPTS, async {
            self.attempts.insert_one(&row).await
        })
        .await;

        match result {
            Ok(_) => Ok(id),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::OpenAttemptExists),
            Err(e) => Err(anyhow!(e).context("Failed to create attempt").into()),
        }
    }

    async fn arm_if_unset(
        &self,
        attempt_id: &str,
        started_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let filter = doc! {
            "_id": attempt_id,
            "started_at": null,
            "status": AttemptStatus::InProgress.as_str(),
        };
        let update = doc! {
            "$set": {
                "started_at": chrono_to_bson(started_at),
                "expires_at": expires_at.map(chrono_to_bson),
            }
        };

        let result = track_db_operation("arm", ATTEMPTS, async {
            self.attempts.update_one(filter, update).await
        })
        .await
        .context("Failed to arm attempt")?;

        Ok(result.modified_count == 1)
    }

    async fn get_attempt(&self, attempt_id: &str) -> Result<Option<Attempt>, StoreError> {
        let row = track_db_operation("find_one", ATTEMPTS, async {
            self.attempts.find_one(doc! { "_id": attempt_id }).await
        })
        .await
        .context("Failed to load attempt")?;

        Ok(row.map(Attempt::from))
    }

    async fn update_if_in_progress(
        &self,
        attempt_id: &str,
        fields: FinalizeFields,
    ) -> Result<bool, StoreError> {
        let filter = doc! {
            "_id": attempt_id,
            "status": AttemptStatus::InProgress.as_str(),
        };
        let update = doc! {
            "$set": {
                "status": fields.status.as_str(),
                "finished_at": chrono_to_bson(fields.finished_at),
                "correct_count": i64::from(fields.correct_count),
                "total_count": i64::from(fields.total_count),
                "score": i64::from(fields.score),
            }
        };

        let result = track_db_operation("finalize", ATTEMPTS, async {
            self.attempts.update_one(filter, update).await
        })
        .await
        .context("Failed to finalize attempt")?;

        Ok(result.modified_count == 1)
    }

    async fn find_open_attempt(
        &self,
        learner_id: &str,
        scenario_id: &str,
    ) -> Result<Option<Attempt>, StoreError> {
        let filter = doc! {
            "learner_id": learner_id,
            "scenario_id": scenario_id,
            "status": AttemptStatus::InProgress.as_str(),
        };

        let row = track_db_operation("find_one", ATTEMPTS, async {
            self.attempts
                .find_one(filter)
                .sort(doc! { "created_at": -1 })
                .await
        })
        .await
        .context("Failed to look up open attempt")?;

        Ok(row.map(Attempt::from))
    }

    async fn list_attempts(
        &self,
        learner_id: &str,
        scenario_id: &str,
    ) -> Result<Vec<Attempt>, StoreError> {
        let filter = doc! { "learner_id": learner_id, "scenario_id": scenario_id };

        let rows: Vec<AttemptDoc> = track_db_operation("find", ATTEMPTS, async {
            self.attempts
                .find(filter)
                .sort(doc! { "created_at": -1 })
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await
        .context("Failed to list attempts")?;

        Ok(rows.into_iter().map(Attempt::from).collect())
    }
}

pub struct MongoAnswerStore {
    answers: Collection<AnswerDoc>,
}

impl MongoAnswerStore {
    pub fn new(db: &Database) -> Self {
        Self {
            answers: db.collection(ANSWERS),
        }
    }
}

#[async_trait]
impl AnswerStore for MongoAnswerStore {
    async fn insert_if_absent(&self, record: &AnswerRecord) -> Result<InsertOutcome, StoreError> {
        let filter = doc! {
            "attempt_id": &record.attempt_id,
            "question_id": &record.question_id,
        };
        let reason = record.reason.map(|r| match r {
            AnswerFailureReason::WrongAnswer => "wrong_answer",
            AnswerFailureReason::Timeout => "timeout",
        });
        let update = doc! {
            "$setOnInsert": {
                "attempt_id": &record.attempt_id,
                "question_id": &record.question_id,
                "selected_option": record.selected_option.map(i64::from),
                "is_correct": record.is_correct,
                "recorded_at": chrono_to_bson(record.recorded_at),
                "reason": reason,
            }
        };

        let result = track_db_operation("upsert", ANSWERS, async {
            self.answers.update_one(filter, update).upsert(true).await
        })
        .await;

        match result {
            Ok(update) => Ok(InsertOutcome {
                created: update.upserted_id.is_some(),
            }),
            // Two concurrent upserts for the same key: the loser sees the unique index
            Err(e) if is_duplicate_key(&e) => Ok(InsertOutcome { created: false }),
            Err(e) => Err(anyhow!(e).context("Failed to record answer").into()),
        }
    }

    async fn list_answers(&self, attempt_id: &str) -> Result<Vec<AnswerRecord>, StoreError> {
        let rows: Vec<AnswerDoc> = track_db_operation("find", ANSWERS, async {
            self.answers
                .find(doc! { "attempt_id": attempt_id })
                .sort(doc! { "recorded_at": 1 })
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await
        .context("Failed to list answers")?;

        Ok(rows.into_iter().map(AnswerRecord::from).collect())
    }
}

pub struct MongoContentProvider {
    steps: Collection<StepDoc>,
    scenarios: Collection<ScenarioDoc>,
}

impl MongoContentProvider {
    pub fn new(db: &Database) -> Self {
        Self {
            steps: db.collection(STEPS),
            scenarios: db.collection(SCENARIOS),
        }
    }
}

#[async_trait]
impl ScenarioContentProvider for MongoContentProvider {
    async fn get_steps(&self, scenario_id: &str, role: &str) -> Result<Vec<Step>, StoreError> {
        let rows: Vec<StepDoc> = track_db_operation("find", STEPS, async {
            self.steps
                .find(doc! { "scenario_id": scenario_id })
                .sort(doc! { "step_order": 1 })
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await
        .context("Failed to load scenario steps")?;

        let steps = rows
            .into_iter()
            .map(|d| Step {
                id: d.id,
                step_order: d.step_order,
                description: d.description,
                roles: d.roles,
                questions: d.questions,
            })
            .collect();

        Ok(visible_steps(steps, role))
    }

    async fn estimated_minutes(&self, scenario_id: &str) -> Result<Option<u32>, StoreError> {
        let row = track_db_operation("find_one", SCENARIOS, async {
            self.scenarios.find_one(doc! { "_id": scenario_id }).await
        })
        .await
        .context("Failed to load scenario")?;

        Ok(row.and_then(|s| to_u32(s.estimated_minutes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn attempt_doc_converts_timestamps_and_counts() {
        let created = Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0).unwrap();
        let row = AttemptDoc {
            id: "a1".into(),
            learner_id: "l1".into(),
            scenario_id: "s1".into(),
            role: "medico".into(),
            status: AttemptStatus::Finalized,
            time_limit_seconds: Some(900),
            started_at: Some(chrono_to_bson(created)),
            expires_at: None,
            finished_at: None,
            correct_count: Some(3),
            total_count: Some(4),
            score: Some(-1),
            created_at: chrono_to_bson(created),
        };

        let attempt = Attempt::from(row);
        assert_eq!(attempt.time_limit_seconds, Some(900));
        assert_eq!(attempt.started_at, Some(created));
        assert_eq!(attempt.correct_count, Some(3));
        assert_eq!(attempt.score, None);
    }
}
