//! Job outcome metrics.

use metrics::{counter, histogram};

pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "clipper_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "clipper_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "clipper_job_duration_seconds";
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "succeeded").record(duration_secs);
}

pub fn record_job_failed(reason: &'static str, duration_secs: f64) {
    counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => "failed").record(duration_secs);
}
