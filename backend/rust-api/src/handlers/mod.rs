use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::EngineError;
use crate::metrics;
use crate::services::AppState;

pub mod attempts;
pub mod sse;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
}

impl ApiError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::AttemptNotFound(_)
            | EngineError::StepNotFound(_)
            | EngineError::QuestionNotFound(_) => ApiError::NotFound(message),
            EngineError::AttemptNotActive { .. }
            | EngineError::AttemptNotArmed
            | EngineError::AttemptIncomplete { .. }
            | EngineError::TimeExpired
            | EngineError::QuestionExpired(_) => ApiError::Conflict(message),
            EngineError::InvalidOption { .. } => ApiError::BadRequest(message),
            EngineError::AttemptLimitReached { .. } => ApiError::Forbidden(message),
            EngineError::Persistence(e) => {
                tracing::error!("Store failure surfaced to client: {}", e);
                ApiError::Unavailable(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
        };
        let json_response = json!({
            "message": message,
            "status": status.as_u16()
        });
        (status, Json(json_response)).into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut dependencies = serde_json::Map::new();

    if let Some(mongo) = &state.mongo {
        let ping = mongo.run_command(mongodb::bson::doc! { "ping": 1 });
        dependencies.insert(
            "mongodb".to_string(),
            check_dependency("MongoDB", Duration::from_secs(1), ping).await,
        );
    }

    if let Some(redis) = &state.redis {
        let mut conn = redis.clone();
        let ping = async move { redis::cmd("PING").query_async::<String>(&mut conn).await };
        dependencies.insert(
            "redis".to_string(),
            check_dependency("Redis", Duration::from_millis(500), ping).await,
        );
    }

    let all_healthy = dependencies
        .values()
        .all(|dep| dep["status"] == "healthy");
    let (status_code, status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "clinsim-api",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": format!("{:?}", state.storage()).to_lowercase(),
            "clock_offset_ms": state.clock.offset().num_milliseconds(),
            "live_sessions": state.sessions.live_sessions().await,
            "dependencies": dependencies
        })),
    )
}

/// Runs one dependency ping under a deadline and describes the result.
async fn check_dependency<F, T, E>(name: &str, limit: Duration, ping: F) -> Value
where
    F: IntoFuture<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, ping.into_future()).await {
        Ok(Ok(_)) => json!({ "status": "healthy" }),
        Ok(Err(e)) => json!({ "status": "unhealthy", "error": format!("{} error: {}", name, e) }),
        Err(_) => json!({
            "status": "unhealthy",
            "error": format!("{} timeout after {}ms", name, limit.as_millis())
        }),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}
