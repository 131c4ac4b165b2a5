use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod clock;
pub mod config;
pub mod errors;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use errors::EngineError;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .nest("/api/v1/attempts", attempt_routes())
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn attempt_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::attempts::start_attempt))
        .route("/history", get(handlers::attempts::attempt_history))
        .route("/{id}", get(handlers::attempts::get_attempt))
        .route("/{id}/arm", post(handlers::attempts::arm_attempt))
        .route("/{id}/tick", get(handlers::attempts::tick_attempt))
        .route("/{id}/steps/{index}", post(handlers::attempts::show_step))
        .route("/{id}/answers", post(handlers::attempts::submit_answer))
        .route(
            "/{id}/answers/retry",
            post(handlers::attempts::retry_pending_answers),
        )
        .route("/{id}/hints", post(handlers::attempts::request_hint))
        .route("/{id}/finish", post(handlers::attempts::finish_attempt))
        .route("/{id}/stream", get(handlers::sse::attempt_stream))
}
