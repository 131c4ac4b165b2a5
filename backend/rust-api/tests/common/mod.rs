#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use clinsim_api::{
    clock::{DriftCorrector, ManualClock},
    config::{Config, EngineSettings},
    create_router,
    models::content::{Question, Scenario, Step},
    models::CreateAttemptRequest,
    services::{session_service::SessionService, AppState, Engine},
    storage::{MemoryAnswerStore, MemoryAttemptStore, MemoryContentProvider, MemoryHintStore},
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

pub const SCENARIO_ID: &str = "sepsis-triage";

/// Engine wired to in-memory stores and a hand-driven clock. The handles let
/// a test inspect rows, simulate outages and move time.
pub struct TestEngine {
    pub clock: ManualClock,
    pub attempts: Arc<MemoryAttemptStore>,
    pub answers: Arc<MemoryAnswerStore>,
    pub hints: Arc<MemoryHintStore>,
    pub content: Arc<MemoryContentProvider>,
    pub engine: Engine,
}

impl TestEngine {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let clock = ManualClock::at(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        let attempts = Arc::new(MemoryAttemptStore::new());
        let answers = Arc::new(MemoryAnswerStore::new());
        let hints = Arc::new(MemoryHintStore::new());
        let content = Arc::new(MemoryContentProvider::with_scenarios(vec![sample_scenario()]));

        let engine = Engine {
            attempts: attempts.clone(),
            answers: answers.clone(),
            hints: hints.clone(),
            content: content.clone(),
            clock: Arc::new(DriftCorrector::new(
                Arc::new(clock.clone()),
                Arc::new(clock.clone()),
                Duration::from_secs(120),
            )),
            settings: EngineSettings::default(),
        };

        Self {
            clock,
            attempts,
            answers,
            hints,
            content,
            engine,
        }
    }

    /// A fresh service over the same stores, like a second process or a reload.
    pub fn service(&self) -> SessionService {
        SessionService::new(self.engine.clone())
    }

    pub fn app(&self) -> Router {
        let state = AppState::from_engine(Config::in_memory(), self.engine.clone());
        create_router(Arc::new(state))
    }
}

pub fn learner() -> String {
    format!("learner-{}", Uuid::new_v4())
}

pub fn start_request(learner_id: &str) -> CreateAttemptRequest {
    CreateAttemptRequest {
        learner_id: learner_id.to_string(),
        scenario_id: SCENARIO_ID.to_string(),
        role: Some("Médico residente".to_string()),
        time_limit_minutes: None,
        privileged: false,
    }
}

/// Privileged start with a one minute budget.
pub fn short_request(learner_id: &str) -> CreateAttemptRequest {
    CreateAttemptRequest {
        time_limit_minutes: Some(1),
        privileged: true,
        ..start_request(learner_id)
    }
}

fn question(id: &str, correct: u32, hints: &[&str]) -> Question {
    Question {
        id: id.to_string(),
        prompt: format!("Prompt for {}", id),
        options: vec![
            "Option A".to_string(),
            "Option B".to_string(),
            "Option C".to_string(),
        ],
        correct_option: correct,
        hints: hints.iter().map(|h| h.to_string()).collect(),
        time_limit_seconds: None,
        roles: vec![],
        is_critical: false,
    }
}

/// Five questions visible to `medico`: q1 (2 hints), q2 (1 hint), q3, q4 and
/// the 30 second q5 on the third step. `farmacia` additionally sees q6.
pub fn sample_scenario() -> Scenario {
    let mut q5 = question("q5", 1, &[]);
    q5.time_limit_seconds = Some(30);
    q5.is_critical = true;

    let mut q6 = question("q6", 0, &[]);
    q6.roles = vec!["farmacia".to_string()];

    Scenario {
        id: SCENARIO_ID.to_string(),
        title: "Sepsis triage".to_string(),
        estimated_minutes: Some(10),
        steps: vec![
            Step {
                id: "assessment".to_string(),
                step_order: 1,
                description: "Initial assessment".to_string(),
                roles: vec![],
                questions: vec![
                    question("q1", 0, &["Check the lactate", "Think about perfusion"]),
                    question("q2", 1, &["Cultures come first"]),
                ],
            },
            Step {
                id: "treatment".to_string(),
                step_order: 2,
                description: "Treatment plan".to_string(),
                roles: vec![],
                questions: vec![question("q3", 2, &[]), question("q4", 0, &[]), q6],
            },
            Step {
                id: "deterioration".to_string(),
                step_order: 3,
                description: "Patient deteriorates".to_string(),
                roles: vec![],
                questions: vec![q5],
            },
            Step {
                id: "nursing-handover".to_string(),
                step_order: 4,
                description: "Handover".to_string(),
                roles: vec!["enfermeria".to_string()],
                questions: vec![question("q7", 0, &[])],
            },
        ],
    }
}

/// Correct option of each `medico` question of [`sample_scenario`].
pub const CORRECT_OPTIONS: [(&str, u32); 5] =
    [("q1", 0), ("q2", 1), ("q3", 2), ("q4", 0), ("q5", 1)];

pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, json)
}
