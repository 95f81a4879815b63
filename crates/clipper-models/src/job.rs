//! Clip job record and its lifecycle state machine.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a job.
///
/// Transitions only move forward: `Pending -> Running -> {Succeeded, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum JobState {
    /// Accepted and waiting for a worker
    #[default]
    Pending,
    /// Claimed by exactly one worker
    Running,
    /// Clip produced, result locator recorded
    Succeeded,
    /// Clipping failed, error detail recorded
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Pending,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Running => "Running",
            JobState::Succeeded => "Succeeded",
            JobState::Failed => "Failed",
        }
    }

    /// Check if this is a terminal state (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown job state: {}", s))
    }
}

/// Rejected clip boundaries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeError {
    #[error("offsets must be finite numbers")]
    NotFinite,

    #[error("offsets must be non-negative (start={start}, end={end})")]
    Negative { start: f64, end: f64 },

    #[error("start offset {start} must be before end offset {end}")]
    Empty { start: f64, end: f64 },
}

/// Validated clip boundaries in seconds, `0 <= start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClipRange {
    start: f64,
    end: f64,
}

impl ClipRange {
    pub fn new(start: f64, end: f64) -> Result<Self, RangeError> {
        if !start.is_finite() || !end.is_finite() {
            return Err(RangeError::NotFinite);
        }
        if start < 0.0 || end < 0.0 {
            return Err(RangeError::Negative { start, end });
        }
        if start >= end {
            return Err(RangeError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A state-machine step that the current record does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("operation not allowed in state {state}")]
    InvalidState { state: JobState },

    #[error("progress {requested} rejected (stored {current}, allowed range {current}..=100)")]
    InvalidProgress { current: u8, requested: i64 },
}

/// One clip-extraction request and its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID, never reused
    pub id: JobId,

    /// Where the input video lives (URL or path)
    pub source_locator: String,

    /// Clip start in seconds
    pub start_offset: f64,

    /// Clip end in seconds
    pub end_offset: f64,

    /// Lifecycle state
    #[serde(default)]
    pub state: JobState,

    /// Progress (0-100), meaningful while running
    #[serde(default)]
    pub progress_percent: u8,

    /// Artifact locator, only when succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_locator: Option<String>,

    /// Failure reason, only when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job with a fresh ID.
    pub fn new(source_locator: impl Into<String>, range: ClipRange) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source_locator: source_locator.into(),
            start_offset: range.start(),
            end_offset: range.end(),
            state: JobState::Pending,
            progress_percent: 0,
            result_locator: None,
            error_detail: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Claim for execution: `Pending -> Running`.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.expect_state(JobState::Pending)?;
        self.state = JobState::Running;
        self.progress_percent = 0;
        self.touch();
        Ok(())
    }

    /// Record progress while running. Equal values are accepted, lower ones are not.
    pub fn record_progress(&mut self, percent: i64) -> Result<(), TransitionError> {
        self.expect_state(JobState::Running)?;
        if !(0..=100).contains(&percent) || percent < i64::from(self.progress_percent) {
            return Err(TransitionError::InvalidProgress {
                current: self.progress_percent,
                requested: percent,
            });
        }
        self.progress_percent = percent as u8;
        self.touch();
        Ok(())
    }

    /// Mark succeeded: `Running -> Succeeded`.
    pub fn succeed(&mut self, result_locator: impl Into<String>) -> Result<(), TransitionError> {
        self.expect_state(JobState::Running)?;
        self.state = JobState::Succeeded;
        self.progress_percent = 100;
        self.result_locator = Some(result_locator.into());
        self.error_detail = None;
        self.touch();
        Ok(())
    }

    /// Mark failed: `Running -> Failed`.
    pub fn fail(&mut self, error_detail: impl Into<String>) -> Result<(), TransitionError> {
        self.expect_state(JobState::Running)?;
        self.state = JobState::Failed;
        self.error_detail = Some(error_detail.into());
        self.result_locator = None;
        self.touch();
        Ok(())
    }

    /// Progress as reported to clients.
    pub fn reported_progress(&self) -> u8 {
        match self.state {
            JobState::Pending => 0,
            JobState::Succeeded => 100,
            JobState::Running | JobState::Failed => self.progress_percent,
        }
    }

    fn expect_state(&self, expected: JobState) -> Result<(), TransitionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(TransitionError::InvalidState { state: self.state })
        }
    }

    // updated_at must strictly advance on every mutation, even within one clock tick.
    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("s3://in.mp4", ClipRange::new(10.0, 20.0).unwrap())
    }

    #[test]
    fn test_range_validation() {
        assert!(ClipRange::new(0.0, 0.5).is_ok());
        assert_eq!(
            ClipRange::new(20.0, 10.0),
            Err(RangeError::Empty { start: 20.0, end: 10.0 })
        );
        assert!(matches!(ClipRange::new(5.0, 5.0), Err(RangeError::Empty { .. })));
        assert!(matches!(ClipRange::new(-1.0, 5.0), Err(RangeError::Negative { .. })));
        assert_eq!(ClipRange::new(f64::NAN, 5.0), Err(RangeError::NotFinite));
        assert_eq!(ClipRange::new(0.0, f64::INFINITY), Err(RangeError::NotFinite));
    }

    #[test]
    fn test_job_creation() {
        let job = job();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.progress_percent, 0);
        assert!(job.result_locator.is_none());
        assert!(job.error_detail.is_none());
    }

    #[test]
    fn test_success_path() {
        let mut job = job();
        let created = job.updated_at;

        job.start().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.updated_at > created);

        job.record_progress(40).unwrap();
        job.record_progress(40).unwrap();
        assert_eq!(
            job.record_progress(30),
            Err(TransitionError::InvalidProgress { current: 40, requested: 30 })
        );
        assert!(job.record_progress(101).is_err());
        assert!(job.record_progress(-1).is_err());

        job.succeed("/clips/a.mp4").unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.reported_progress(), 100);
        assert_eq!(job.result_locator.as_deref(), Some("/clips/a.mp4"));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.start().unwrap();
        job.fail("unsupported codec").unwrap();

        assert_eq!(
            job.succeed("x"),
            Err(TransitionError::InvalidState { state: JobState::Failed })
        );
        assert!(job.fail("again").is_err());
        assert!(job.start().is_err());
        assert!(job.record_progress(50).is_err());
        assert_eq!(job.error_detail.as_deref(), Some("unsupported codec"));
        assert!(job.result_locator.is_none());
    }

    #[test]
    fn test_pending_rejects_mutations() {
        let mut job = job();
        assert!(job.record_progress(10).is_err());
        assert!(job.succeed("x").is_err());
        assert!(job.fail("x").is_err());
        assert_eq!(job.state, JobState::Pending);
    }

    #[test]
    fn test_state_parse_and_wire_format() {
        for state in JobState::ALL {
            assert_eq!(state.as_str().parse::<JobState>().unwrap(), state);
        }
        assert_eq!(serde_json::to_string(&JobState::Succeeded).unwrap(), "\"Succeeded\"");

        let value = serde_json::to_value(job()).unwrap();
        assert_eq!(value["state"], "Pending");
        assert_eq!(value["sourceLocator"], "s3://in.mp4");
        assert!(value.get("resultLocator").is_none());
    }
}
