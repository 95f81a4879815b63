//! Background sweeper for stalled and expired jobs.
//!
//! Every pass is optional and off unless configured:
//! - fail `Running` jobs that stopped reporting (crashed worker)
//! - re-enqueue `Pending` jobs that were never picked up (lost enqueue)
//! - purge terminal jobs past the retention window

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use clipper_models::JobState;
use clipper_queue::{QueueError, TaskQueue};
use clipper_store::JobStore;

use crate::metrics;

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Fail `Running` jobs with no update for this long
    pub stale_running: Option<Duration>,
    /// Re-enqueue `Pending` jobs older than this
    pub stale_pending: Option<Duration>,
    /// Purge terminal jobs older than this
    pub retention: Option<Duration>,
    /// Time between passes
    pub interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            stale_running: None,
            stale_pending: None,
            retention: None,
            interval: Duration::from_secs(30),
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

impl SweepConfig {
    pub fn from_env() -> Self {
        Self {
            stale_running: env_secs("STALE_RUNNING_SECS"),
            stale_pending: env_secs("STALE_PENDING_SECS"),
            retention: env_secs("JOB_RETENTION_SECS"),
            interval: env_secs("SWEEP_INTERVAL_SECS").unwrap_or(Duration::from_secs(30)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.stale_running.is_some() || self.stale_pending.is_some() || self.retention.is_some()
    }
}

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub failed: u32,
    pub requeued: u32,
    pub purged: u32,
}

/// Periodic reconciliation over the job store.
pub struct JobSweeper {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    config: SweepConfig,
}

impl JobSweeper {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>, config: SweepConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Sweep on an interval until `shutdown` flips to true.
    ///
    /// Meant to be spawned as a background task.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.is_enabled() {
            info!("Job sweeper is disabled");
            return;
        }

        info!("Starting job sweeper (interval: {:?})", self.config.interval);
        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.sweep_once().await {
                Ok(report) if report != SweepReport::default() => info!(
                    failed = report.failed,
                    requeued = report.requeued,
                    purged = report.purged,
                    "Job sweep complete"
                ),
                Ok(_) => {}
                Err(e) => error!("Job sweep error: {}", e),
            }
        }
        info!("Job sweeper stopped");
    }

    /// Run every configured pass once.
    pub async fn sweep_once(&self) -> anyhow::Result<SweepReport> {
        let mut report = SweepReport::default();
        if let Some(threshold) = self.config.stale_running {
            report.failed = self.fail_stale_running(threshold).await?;
        }
        if let Some(threshold) = self.config.stale_pending {
            report.requeued = self.requeue_stale_pending(threshold).await?;
        }
        if let Some(retention) = self.config.retention {
            report.purged = self.purge_expired(retention).await?;
        }
        Ok(report)
    }

    async fn fail_stale_running(&self, threshold: Duration) -> anyhow::Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(threshold)?;
        let detail = format!("Timeout: no progress for {} seconds", threshold.as_secs());

        let mut failed = 0;
        for job in self.store.list_by_state(JobState::Running).await? {
            if job.updated_at >= cutoff {
                continue;
            }
            // The store re-checks state and staleness atomically.
            match self.store.fail_if_stale(&job.id, cutoff, &detail).await {
                Ok(true) => {
                    warn!(job_id = %job.id, updated_at = %job.updated_at, "Failed stale running job");
                    metrics::record_job_swept("failed");
                    failed += 1;
                }
                Ok(false) => debug!(job_id = %job.id, "Job moved on before it could be failed"),
                Err(e) => error!(job_id = %job.id, "Failed to fail stale job: {}", e),
            }
        }
        Ok(failed)
    }

    async fn requeue_stale_pending(&self, threshold: Duration) -> anyhow::Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(threshold)?;

        let mut requeued = 0;
        for job in self.store.list_by_state(JobState::Pending).await? {
            if job.created_at >= cutoff {
                continue;
            }
            match self.queue.enqueue(&job.id).await {
                Ok(()) => {
                    warn!(job_id = %job.id, created_at = %job.created_at, "Re-enqueued stalled pending job");
                    metrics::record_job_swept("requeued");
                    requeued += 1;
                }
                // Still waiting in the queue; nothing was lost.
                Err(QueueError::Duplicate(_)) => debug!(job_id = %job.id, "Pending job still queued"),
                Err(e) => warn!(job_id = %job.id, "Failed to re-enqueue pending job: {}", e),
            }
        }
        Ok(requeued)
    }

    async fn purge_expired(&self, retention: Duration) -> anyhow::Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(retention)?;

        let mut purged = 0;
        for state in [JobState::Succeeded, JobState::Failed] {
            for job in self.store.list_by_state(state).await? {
                if job.updated_at >= cutoff {
                    continue;
                }
                match self.store.purge_terminal(&job.id, cutoff).await {
                    Ok(true) => {
                        debug!(job_id = %job.id, "Purged expired job");
                        metrics::record_job_swept("purged");
                        purged += 1;
                    }
                    Ok(false) => {}
                    Err(e) => error!(job_id = %job.id, "Failed to purge job: {}", e),
                }
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipper_queue::InMemoryTaskQueue;
    use clipper_store::{InMemoryJobStore, StoreError};

    const TICK: Duration = Duration::from_millis(20);

    fn sweeper(config: SweepConfig) -> (JobSweeper, Arc<InMemoryJobStore>, Arc<InMemoryTaskQueue>) {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryTaskQueue::default());
        (JobSweeper::new(store.clone(), queue.clone(), config), store, queue)
    }

    #[tokio::test]
    async fn test_disabled_by_default() {
        assert!(!SweepConfig::default().is_enabled());
        let (sweeper, _, _) = sweeper(SweepConfig::default());
        assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_fails_stale_running_jobs() {
        let (sweeper, store, _) = sweeper(SweepConfig {
            stale_running: Some(TICK),
            ..SweepConfig::default()
        });

        let stale = store.create("a.mp4", 0.0, 1.0).await.unwrap();
        store.claim_for_execution(&stale).await.unwrap();
        tokio::time::sleep(TICK * 3).await;

        let fresh = store.create("b.mp4", 0.0, 1.0).await.unwrap();
        store.claim_for_execution(&fresh).await.unwrap();

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.failed, 1);

        let job = store.get(&stale).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_detail.as_deref(), Some("Timeout: no progress for 0 seconds"));
        assert_eq!(store.get(&fresh).await.unwrap().state, JobState::Running);

        // The worker's late terminal write is an ordering violation.
        let err = store.complete(&stale, "/clips/late.mp4").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_requeues_lost_pending_jobs() {
        let (sweeper, store, queue) = sweeper(SweepConfig {
            stale_pending: Some(TICK),
            ..SweepConfig::default()
        });

        let lost = store.create("a.mp4", 0.0, 1.0).await.unwrap();
        let queued = store.create("b.mp4", 0.0, 1.0).await.unwrap();
        queue.enqueue(&queued).await.unwrap();
        tokio::time::sleep(TICK * 3).await;

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(queue.len().await.unwrap(), 2);
        assert_eq!(queue.dequeue().await.unwrap(), queued);
        assert_eq!(queue.dequeue().await.unwrap(), lost);
    }

    #[tokio::test]
    async fn test_purges_expired_terminal_jobs() {
        let (sweeper, store, _) = sweeper(SweepConfig {
            retention: Some(TICK),
            ..SweepConfig::default()
        });

        let done = store.create("a.mp4", 0.0, 1.0).await.unwrap();
        store.claim_for_execution(&done).await.unwrap();
        store.complete(&done, "/clips/a.mp4").await.unwrap();
        let pending = store.create("b.mp4", 0.0, 1.0).await.unwrap();
        tokio::time::sleep(TICK * 3).await;

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(matches!(store.get(&done).await, Err(StoreError::NotFound(_))));
        assert!(store.get(&pending).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (sweeper, _, _) = sweeper(SweepConfig {
            retention: Some(Duration::from_secs(3600)),
            interval: TICK,
            ..SweepConfig::default()
        });
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { sweeper.run(rx).await });

        tokio::time::sleep(TICK * 2).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
