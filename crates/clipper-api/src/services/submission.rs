//! Job submission and lookup.
//!
//! The service admits new jobs (store record, then queue entry) and answers
//! status and result queries from the store alone. It never waits on a job.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use clipper_models::{Job, JobId, JobState};
use clipper_queue::TaskQueue;
use clipper_store::{JobStore, StoreError};

use crate::metrics;

pub type SubmissionResult<T> = Result<T, SubmissionError>;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The job has not produced a result yet.
    #[error("Job {id} is {state}")]
    NotReady { id: JobId, state: JobState },

    #[error("Job {id} failed: {error_detail}")]
    JobFailed { id: JobId, error_detail: String },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SubmissionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidRange(e) => SubmissionError::InvalidRange(e.to_string()),
            StoreError::NotFound(id) => SubmissionError::NotFound(id),
            other => SubmissionError::Store(other),
        }
    }
}

/// Progress snapshot of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub progress_percent: u8,
}

impl From<&Job> for JobStatus {
    fn from(job: &Job) -> Self {
        Self {
            state: job.state,
            progress_percent: job.reported_progress(),
        }
    }
}

/// Admits jobs and answers polling queries.
#[derive(Clone)]
pub struct SubmissionService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
}

impl SubmissionService {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Create the job record and queue it for a worker.
    ///
    /// The id is returned once the record exists. A failed enqueue leaves the
    /// job `Pending` until the sweeper re-enqueues it.
    pub async fn submit(
        &self,
        source_locator: &str,
        start_offset: f64,
        end_offset: f64,
    ) -> SubmissionResult<JobId> {
        let id = self
            .store
            .create(source_locator, start_offset, end_offset)
            .await?;
        metrics::record_job_submitted();

        match self.queue.enqueue(&id).await {
            Ok(()) => info!(job_id = %id, "Job submitted"),
            Err(e) => warn!(
                job_id = %id,
                "Job created but not enqueued, it stays Pending until re-enqueued: {}", e
            ),
        }
        Ok(id)
    }

    /// Full job record.
    pub async fn get_job(&self, id: &JobId) -> SubmissionResult<Job> {
        Ok(self.store.get(id).await?)
    }

    /// Current state and progress.
    pub async fn get_status(&self, id: &JobId) -> SubmissionResult<JobStatus> {
        let job = self.get_job(id).await?;
        Ok(JobStatus::from(&job))
    }

    /// Result locator of a succeeded job.
    pub async fn get_result(&self, id: &JobId) -> SubmissionResult<String> {
        let job = self.get_job(id).await?;
        result_of(job)
    }
}

fn result_of(job: Job) -> SubmissionResult<String> {
    match job.state {
        JobState::Succeeded => job.result_locator.ok_or_else(|| {
            SubmissionError::Store(StoreError::corrupt(&job.id, "succeeded without result locator"))
        }),
        JobState::Failed => {
            debug!(job_id = %job.id, "Result requested for failed job");
            Err(SubmissionError::JobFailed {
                error_detail: job.error_detail.unwrap_or_default(),
                id: job.id,
            })
        }
        state => Err(SubmissionError::NotReady { id: job.id, state }),
    }
}
