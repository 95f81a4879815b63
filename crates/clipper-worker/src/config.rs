//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Scratch directory for sources and outputs
    pub work_dir: String,
    /// Upper bound on a single clipping run; `None` runs to completion
    pub job_timeout: Option<Duration>,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_timeout: Duration,
    /// How often to look for deliveries stranded by crashed consumers
    pub claim_interval: Duration,
    /// Minimum idle time before a stranded delivery is taken over
    pub claim_min_idle: Duration,
    /// Re-encode clips (frame-accurate) instead of stream copy
    pub reencode: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: "/tmp/clipper".to_string(),
            job_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
            reencode: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Whole seconds; zero counts as unset.
fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name).ok().as_deref().and_then(parse_secs)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_parse::<usize>("WORKER_MAX_JOBS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            work_dir: std::env::var("WORKER_WORK_DIR").unwrap_or(defaults.work_dir),
            job_timeout: env_secs("WORKER_JOB_TIMEOUT"),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            claim_interval: env_secs("WORKER_CLAIM_INTERVAL_SECS").unwrap_or(defaults.claim_interval),
            claim_min_idle: env_secs("WORKER_CLAIM_MIN_IDLE_SECS").unwrap_or(defaults.claim_min_idle),
            reencode: env_parse("FFMPEG_REENCODE").unwrap_or(defaults.reencode),
        }
    }
}
