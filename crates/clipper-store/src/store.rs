//! The job store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clipper_models::{Job, JobId, JobState};

use crate::error::StoreResult;

/// Durable record of every submitted job and its current state.
///
/// Every mutating call is atomic with respect to concurrent callers on the
/// same ID; unrelated jobs never serialize behind each other.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Validate the range and persist a new `Pending` job.
    async fn create(
        &self,
        source_locator: &str,
        start_offset: f64,
        end_offset: f64,
    ) -> StoreResult<JobId>;

    async fn get(&self, id: &JobId) -> StoreResult<Job>;

    /// Atomically move `Pending -> Running`. Fails with `AlreadyClaimed`
    /// when the job is in any other state.
    async fn claim_for_execution(&self, id: &JobId) -> StoreResult<Job>;

    /// Store a progress value. Only while `Running`; values must lie in
    /// `0..=100` and never go below the stored one.
    async fn update_progress(&self, id: &JobId, percent: i64) -> StoreResult<()>;

    /// `Running -> Succeeded` with the artifact locator.
    async fn complete(&self, id: &JobId, result_locator: &str) -> StoreResult<()>;

    /// `Running -> Failed` with the failure reason.
    async fn fail(&self, id: &JobId, error_detail: &str) -> StoreResult<()>;

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>>;

    /// Fail a `Running` job whose last update is older than `cutoff`.
    /// Returns whether the job was transitioned.
    async fn fail_if_stale(
        &self,
        id: &JobId,
        cutoff: DateTime<Utc>,
        error_detail: &str,
    ) -> StoreResult<bool>;

    /// Delete a terminal job whose last update is older than `cutoff`.
    /// Returns whether the record was removed.
    async fn purge_terminal(&self, id: &JobId, cutoff: DateTime<Utc>) -> StoreResult<bool>;

    /// Backend connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}
