//! Job store error types.

use clipper_models::{JobId, JobState, RangeError, TransitionError};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid range: {0}")]
    InvalidRange(#[from] RangeError),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already claimed: {0}")]
    AlreadyClaimed(JobId),

    #[error("Job {id} is {state}, operation not allowed")]
    InvalidState { id: JobId, state: JobState },

    #[error("Job {id} progress {requested} rejected (stored {current})")]
    InvalidProgress { id: JobId, current: u8, requested: i64 },

    #[error("Corrupt job record {id}: {reason}")]
    Corrupt { id: JobId, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    pub fn corrupt(id: &JobId, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Attach a job ID to a state machine rejection.
    pub fn transition(id: &JobId, err: TransitionError) -> Self {
        match err {
            TransitionError::InvalidState { state } => Self::InvalidState {
                id: id.clone(),
                state,
            },
            TransitionError::InvalidProgress { current, requested } => Self::InvalidProgress {
                id: id.clone(),
                current,
                requested,
            },
        }
    }

    /// Ordering errors that a well-behaved worker never triggers.
    pub fn is_ordering_violation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidState { .. } | StoreError::InvalidProgress { .. }
        )
    }

    /// Backend failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Redis(_))
    }
}
