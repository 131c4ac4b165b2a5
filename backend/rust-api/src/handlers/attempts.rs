use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use super::ApiError;
use crate::{
    extractors::AppJson,
    models::{
        answer::SubmitAnswerRequest, hint::RequestHintRequest, CreateAttemptRequest,
        FinishRequest, HistoryQuery,
    },
    services::AppState,
};

/// POST /api/v1/attempts
pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<CreateAttemptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;

    tracing::info!(
        "Start requested: learner={}, scenario={}",
        req.learner_id,
        req.scenario_id
    );

    let response = state.sessions.start_or_resume(req).await?;
    let status = if response.resumed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(response)))
}

/// GET /api/v1/attempts/{id}
pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (session, was_already_expired) = state.sessions.open(&attempt_id).await?;
    Ok(Json(session.view(was_already_expired)))
}

/// GET /api/v1/attempts/history?learner_id=..&scenario_id=..
pub async fn attempt_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state
        .sessions
        .history(&query.learner_id, &query.scenario_id)
        .await?;
    Ok(Json(history))
}

/// POST /api/v1/attempts/{id}/arm
pub async fn arm_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.session(&attempt_id).await?;
    Ok(Json(session.arm().await?))
}

/// GET /api/v1/attempts/{id}/tick
pub async fn tick_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.session(&attempt_id).await?;
    let report = session.tick_and_settle().await;
    state.sessions.release_if_terminal(&session).await;
    Ok(Json(report))
}

/// POST /api/v1/attempts/{id}/steps/{index}
pub async fn show_step(
    State(state): State<Arc<AppState>>,
    Path((attempt_id, index)): Path<(String, usize)>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.session(&attempt_id).await?;
    Ok(Json(session.show_step(index)?))
}

/// POST /api/v1/attempts/{id}/answers
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.session(&attempt_id).await?;
    let outcome = session
        .submit_answer(&req.question_id, req.option_index)
        .await?;
    Ok(Json(outcome))
}

/// POST /api/v1/attempts/{id}/answers/retry
pub async fn retry_pending_answers(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.session(&attempt_id).await?;
    Ok(Json(session.retry_pending().await))
}

/// POST /api/v1/attempts/{id}/hints
pub async fn request_hint(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    AppJson(req): AppJson<RequestHintRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.session(&attempt_id).await?;
    Ok(Json(session.request_hint(&req.question_id).await?))
}

/// POST /api/v1/attempts/{id}/finish
pub async fn finish_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // The body is optional; an empty one finishes with the default status
    let req: FinishRequest = if body.is_empty() {
        FinishRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid finish request: {}", e)))?
    };
    let outcome = state.sessions.finish(&attempt_id, req.status).await?;
    Ok(Json(outcome))
}
