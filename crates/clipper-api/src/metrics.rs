//! Prometheus metrics for the API server.

use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return the handle that renders it.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "clipper_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "clipper_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "clipper_http_requests_in_flight";

    // Job metrics
    pub const JOBS_SUBMITTED_TOTAL: &str = "clipper_jobs_submitted_total";
    pub const JOBS_SWEPT_TOTAL: &str = "clipper_jobs_swept_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "clipper_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an admitted job.
pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

/// Record a sweeper action (`failed`, `requeued`, `purged`).
pub fn record_job_swept(action: &'static str) {
    counter!(names::JOBS_SWEPT_TOTAL, "action" => action).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Replace id path segments with `:id` to keep label cardinality bounded.
fn sanitize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            let stem = segment.strip_suffix(".mp4").unwrap_or(segment);
            if uuid::Uuid::parse_str(stem).is_ok()
                || (!stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()))
            {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    let status = response.status().as_u16();
    record_http_request(&method, &path, status, start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/jobs/550e8400-e29b-41d4-a716-446655440000/result"),
            "/jobs/:id/result"
        );
        assert_eq!(
            sanitize_path("/api/clip-progress/550e8400-e29b-41d4-a716-446655440000"),
            "/api/clip-progress/:id"
        );
        assert_eq!(sanitize_path("/api/clip-video/"), "/api/clip-video/");
        assert_eq!(sanitize_path("/jobs/42"), "/jobs/:id");
    }
}
