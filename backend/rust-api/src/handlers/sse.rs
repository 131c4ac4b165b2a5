use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::sleep;

use super::ApiError;
use crate::{
    models::timer::{TimeExpired, TimerEvent, TimerTick},
    services::{attempt_session::AttemptSession, AppState},
};

/// SSE endpoint for timer events
/// GET /api/v1/attempts/{id}/stream
pub async fn attempt_stream(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Client connected to SSE stream: attempt={}", attempt_id);

    let session = state.sessions.session(&attempt_id).await?;

    tracing::info!(
        "Starting SSE stream: attempt={}, tick_interval={}ms",
        attempt_id,
        session.tick_interval().as_millis()
    );

    Ok(Sse::new(create_timer_stream(state, session)).keep_alive(KeepAlive::default()))
}

/// Ticks the session until its deadline passes or it closes, then sends one
/// `time-expired` event and ends.
fn create_timer_stream(
    state: Arc<AppState>,
    session: Arc<AttemptSession>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (state, session, false, true),
        move |(state, session, final_sent, first)| async move {
            if final_sent {
                return None;
            }

            if !first {
                sleep(session.tick_interval()).await;
            }

            let report = session.tick_and_settle().await;
            let status = session.status();
            let now = state.clock.corrected_now();

            if report.expired || status.is_terminal() {
                state.sessions.release_if_terminal(&session).await;

                let expired_event = TimerEvent::TimeExpired(TimeExpired {
                    attempt_id: session.attempt_id().to_string(),
                    timestamp: now,
                    status: status.is_terminal().then_some(status),
                    message: if report.time_up || !status.is_terminal() {
                        "Time limit exceeded".to_string()
                    } else {
                        format!("Attempt {}", status)
                    },
                });

                let event = Event::default()
                    .event(expired_event.event_name())
                    .data(expired_event.to_sse_data());

                tracing::info!(
                    "Timer stream closing: attempt={}, status={}",
                    session.attempt_id(),
                    status
                );
                return Some((Ok(event), (state, session, true, false)));
            }

            let tick_event = TimerEvent::TimerTick(TimerTick {
                attempt_id: session.attempt_id().to_string(),
                remaining_seconds: report.remaining_seconds,
                question_timers: report.question_timers,
                timestamp: now,
            });

            let event = Event::default()
                .event(tick_event.event_name())
                .data(tick_event.to_sse_data());

            Some((Ok(event), (state, session, false, false)))
        },
    )
}
