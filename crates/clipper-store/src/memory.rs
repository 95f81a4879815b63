//! In-process job store.
//!
//! The map lock is only held to insert, look up or remove an entry; every
//! state change happens under that job's own mutex.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use clipper_models::{ClipRange, Job, JobId, JobState};

use crate::error::{StoreError, StoreResult};
use crate::store::JobStore;

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn entry(&self, id: &JobId) -> StoreResult<Arc<Mutex<Job>>> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        source_locator: &str,
        start_offset: f64,
        end_offset: f64,
    ) -> StoreResult<JobId> {
        let range = ClipRange::new(start_offset, end_offset)?;

        let mut jobs = self.jobs.write().await;
        let mut job = Job::new(source_locator, range);
        while jobs.contains_key(&job.id) {
            job.id = JobId::new();
        }

        let id = job.id.clone();
        jobs.insert(id.clone(), Arc::new(Mutex::new(job)));
        debug!(job_id = %id, "Created job");
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let entry = self.entry(id).await?;
        let job = entry.lock().await;
        Ok(job.clone())
    }

    async fn claim_for_execution(&self, id: &JobId) -> StoreResult<Job> {
        let entry = self.entry(id).await?;
        let mut job = entry.lock().await;
        job.start()
            .map_err(|_| StoreError::AlreadyClaimed(id.clone()))?;
        Ok(job.clone())
    }

    async fn update_progress(&self, id: &JobId, percent: i64) -> StoreResult<()> {
        let entry = self.entry(id).await?;
        let mut job = entry.lock().await;
        job.record_progress(percent)
            .map_err(|e| StoreError::transition(id, e))
    }

    async fn complete(&self, id: &JobId, result_locator: &str) -> StoreResult<()> {
        let entry = self.entry(id).await?;
        let mut job = entry.lock().await;
        job.succeed(result_locator)
            .map_err(|e| StoreError::transition(id, e))
    }

    async fn fail(&self, id: &JobId, error_detail: &str) -> StoreResult<()> {
        let entry = self.entry(id).await?;
        let mut job = entry.lock().await;
        job.fail(error_detail)
            .map_err(|e| StoreError::transition(id, e))
    }

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>> {
        let entries: Vec<_> = self.jobs.read().await.values().cloned().collect();

        let mut jobs = Vec::new();
        for entry in entries {
            let job = entry.lock().await;
            if job.state == state {
                jobs.push(job.clone());
            }
        }
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn fail_if_stale(
        &self,
        id: &JobId,
        cutoff: DateTime<Utc>,
        error_detail: &str,
    ) -> StoreResult<bool> {
        let entry = self.entry(id).await?;
        let mut job = entry.lock().await;
        if job.state != JobState::Running || job.updated_at >= cutoff {
            return Ok(false);
        }
        job.fail(error_detail)
            .map_err(|e| StoreError::transition(id, e))?;
        Ok(true)
    }

    async fn purge_terminal(&self, id: &JobId, cutoff: DateTime<Utc>) -> StoreResult<bool> {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get(id).cloned() else {
            return Ok(false);
        };

        let job = entry.lock().await;
        if !job.state.is_terminal() || job.updated_at >= cutoff {
            return Ok(false);
        }
        drop(job);

        jobs.remove(id);
        debug!(job_id = %id, "Purged job");
        Ok(true)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::collections::HashSet;

    async fn running_job(store: &InMemoryJobStore) -> JobId {
        let id = store.create("s3://in.mp4", 10.0, 20.0).await.unwrap();
        store.claim_for_execution(&id).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryJobStore::new();
        let id = store.create("s3://in.mp4", 10.0, 20.0).await.unwrap();

        let job = store.get(&id).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.source_locator, "s3://in.mp4");
        assert_eq!(job.start_offset, 10.0);
        assert_eq!(job.end_offset, 20.0);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_range_without_record() {
        let store = InMemoryJobStore::new();

        for (start, end) in [(20.0, 10.0), (5.0, 5.0), (-1.0, 4.0), (0.0, -2.0)] {
            let err = store.create("s3://in.mp4", start, end).await.unwrap_err();
            assert!(matches!(err, StoreError::InvalidRange(_)), "{start}..{end}");
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let store = InMemoryJobStore::new();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let id = store.create("a.mp4", 0.0, 1.0).await.unwrap();
            assert!(seen.insert(id));
        }
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let store = InMemoryJobStore::new();
        let err = store.get(&JobId::from_string("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(InMemoryJobStore::new());
        let id = store.create("s3://in.mp4", 0.0, 5.0).await.unwrap();

        let attempts = (0..8).map(|_| {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move { store.claim_for_execution(&id).await })
        });

        let results = futures_util::future::join_all(attempts).await;
        let mut wins = 0;
        for result in results {
            match result.unwrap() {
                Ok(job) => {
                    wins += 1;
                    assert_eq!(job.state, JobState::Running);
                }
                Err(StoreError::AlreadyClaimed(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_progress_rules() {
        let store = InMemoryJobStore::new();
        let pending = store.create("a.mp4", 0.0, 1.0).await.unwrap();
        assert!(matches!(
            store.update_progress(&pending, 10).await,
            Err(StoreError::InvalidState { state: JobState::Pending, .. })
        ));

        let id = running_job(&store).await;
        store.update_progress(&id, 30).await.unwrap();
        store.update_progress(&id, 30).await.unwrap();
        assert!(matches!(
            store.update_progress(&id, 20).await,
            Err(StoreError::InvalidProgress { current: 30, requested: 20, .. })
        ));
        assert!(store.update_progress(&id, 101).await.is_err());
        assert!(store.update_progress(&id, -5).await.is_err());
        assert_eq!(store.get(&id).await.unwrap().progress_percent, 30);
    }

    #[tokio::test]
    async fn test_terminal_transitions() {
        let store = InMemoryJobStore::new();

        let ok = running_job(&store).await;
        store.complete(&ok, "/clips/ok.mp4").await.unwrap();
        let job = store.get(&ok).await.unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.result_locator.as_deref(), Some("/clips/ok.mp4"));
        assert!(store.fail(&ok, "late").await.is_err());
        assert!(store.claim_for_execution(&ok).await.is_err());

        let bad = running_job(&store).await;
        store.fail(&bad, "unsupported codec").await.unwrap();
        let job = store.get(&bad).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_detail.as_deref(), Some("unsupported codec"));
        assert!(matches!(
            store.complete(&bad, "x").await,
            Err(StoreError::InvalidState { state: JobState::Failed, .. })
        ));

        let pending = store.create("a.mp4", 0.0, 1.0).await.unwrap();
        assert!(store.complete(&pending, "x").await.is_err());
        assert!(store.fail(&pending, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_updated_at_advances() {
        let store = InMemoryJobStore::new();
        let id = store.create("a.mp4", 0.0, 1.0).await.unwrap();
        let t0 = store.get(&id).await.unwrap().updated_at;

        store.claim_for_execution(&id).await.unwrap();
        let t1 = store.get(&id).await.unwrap().updated_at;
        store.update_progress(&id, 1).await.unwrap();
        let t2 = store.get(&id).await.unwrap().updated_at;

        assert!(t1 > t0);
        assert!(t2 > t1);
    }

    #[tokio::test]
    async fn test_list_and_sweep_helpers() {
        let store = InMemoryJobStore::new();
        let running = running_job(&store).await;
        let pending = store.create("a.mp4", 0.0, 1.0).await.unwrap();

        let listed = store.list_by_state(JobState::Pending).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, pending);

        let past = Utc::now() - Duration::hours(1);
        assert!(!store.fail_if_stale(&running, past, "Timeout").await.unwrap());
        assert!(!store.fail_if_stale(&pending, Utc::now(), "Timeout").await.unwrap());

        let future = Utc::now() + Duration::hours(1);
        assert!(store.fail_if_stale(&running, future, "Timeout").await.unwrap());
        assert_eq!(store.get(&running).await.unwrap().state, JobState::Failed);

        assert!(!store.purge_terminal(&pending, future).await.unwrap());
        assert!(!store.purge_terminal(&running, past).await.unwrap());
        assert!(store.purge_terminal(&running, future).await.unwrap());
        assert!(matches!(
            store.get(&running).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
