use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Store Metrics
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // Attempt lifecycle
    pub static ref ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "attempts_total",
        "Attempts by lifecycle event",
        &["status"]
    )
    .unwrap();

    pub static ref ATTEMPTS_ACTIVE: IntGauge = register_int_gauge!(
        "attempts_active",
        "Number of attempt sessions held in memory and still in progress"
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["correct"]
    )
    .unwrap();

    pub static ref ANSWER_PERSIST_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "answer_persist_failures_total",
        "Answer writes that failed after retries and were kept pending"
    )
    .unwrap();

    pub static ref HINTS_REVEALED_TOTAL: IntCounter = register_int_counter!(
        "hints_revealed_total",
        "Total number of hints revealed"
    )
    .unwrap();

    pub static ref FINALIZE_TOTAL: IntCounterVec = register_int_counter_vec!(
        "finalize_total",
        "Finalize calls by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref RECONCILIATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "reconciliations_total",
        "On-load reconciliation results",
        &["result"]
    )
    .unwrap();

    // Clock
    pub static ref CLOCK_SYNC_TOTAL: IntCounterVec = register_int_counter_vec!(
        "clock_sync_total",
        "Server clock samples by status",
        &["status"]
    )
    .unwrap();

    pub static ref CLOCK_OFFSET_MS: IntGauge = register_int_gauge!(
        "clock_offset_ms",
        "Last measured server minus local clock offset in milliseconds"
    )
    .unwrap();
}

/// Prometheus text exposition of the default registry.
pub fn render_metrics() -> Result<String, prometheus::Error> {
    TextEncoder::new().encode_to_string(&prometheus::gather())
}

fn outcome_label<T, E>(result: &Result<T, E>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(_) => "error",
    }
}

/// Awaits one store call, counting it by outcome and observing its latency.
pub async fn track_db_operation<F, T, E>(
    operation: &str,
    collection: &str,
    call: F,
) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let timer = DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .start_timer();
    let result = call.await;
    timer.observe_duration();

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, outcome_label(&result)])
        .inc();
    result
}
