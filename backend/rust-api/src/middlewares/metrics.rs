use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use uuid::Uuid;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per method and route shape.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = route_shape(req.uri().path());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &route, &status])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &route])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// Replaces the attempt id and step index with placeholders so label
/// cardinality stays bounded.
fn route_shape(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    segments
        .iter()
        .enumerate()
        .map(|(i, segment)| {
            let parent = i.checked_sub(1).map(|p| segments[p]);
            match parent {
                Some("attempts") if !segment.is_empty() && *segment != "history" => "{id}",
                Some("steps") => "{index}",
                _ if Uuid::parse_str(segment).is_ok() => "{id}",
                _ => segment,
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
