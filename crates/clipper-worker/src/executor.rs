//! Job executor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use clipper_models::JobId;
use clipper_queue::{QueueError, TaskQueue};

use crate::config::WorkerConfig;
use crate::processor::JobProcessor;

/// Floor for the reclaim period; `interval` panics on zero.
const MIN_CLAIM_INTERVAL: Duration = Duration::from_secs(1);

/// Consumes job ids from the queue and runs up to `max_concurrent_jobs` of
/// them at once.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<dyn TaskQueue>,
    processor: JobProcessor,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: Arc<dyn TaskQueue>, processor: JobProcessor) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            queue,
            processor,
            job_semaphore,
            shutdown,
        }
    }

    /// Run until `shutdown` is called, then wait for in-flight jobs.
    pub async fn run(&self) {
        info!(
            "Starting job executor with {} max concurrent jobs",
            self.config.max_concurrent_jobs
        );

        let claim_task = tokio::spawn(Self::reclaim_loop(
            Arc::clone(&self.queue),
            self.processor.clone(),
            Arc::clone(&self.job_semaphore),
            self.config.clone(),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Only take an id once there is a slot to run it.
            let permit = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let id = tokio::select! {
                _ = shutdown_rx.changed() => continue,
                result = self.queue.dequeue() => match result {
                    Ok(id) => id,
                    Err(QueueError::Closed) => {
                        info!("Task queue closed, stopping executor");
                        break;
                    }
                    Err(e) => {
                        error!("Error consuming jobs: {}", e);
                        drop(permit);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                },
            };

            let processor = self.processor.clone();
            tokio::spawn(async move {
                let _permit = permit;
                processor.process(id).await;
            });
        }

        claim_task.abort();

        info!("Waiting for in-flight jobs to complete...");
        let all = self.config.max_concurrent_jobs as u32;
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            self.job_semaphore.acquire_many(all),
        )
        .await
        {
            Ok(_) => info!("Job executor stopped"),
            Err(_) => warn!(
                "Shutdown timeout after {:?}; abandoning in-flight jobs",
                self.config.shutdown_timeout
            ),
        }
    }

    /// Periodically take over deliveries stranded by crashed consumers.
    async fn reclaim_loop(
        queue: Arc<dyn TaskQueue>,
        processor: JobProcessor,
        semaphore: Arc<Semaphore>,
        config: WorkerConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.claim_interval.max(MIN_CLAIM_INTERVAL));
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match queue.reclaim_stale(config.claim_min_idle).await {
                        Ok(ids) if !ids.is_empty() => {
                            info!("Reclaimed {} stranded deliveries", ids.len());
                            if !Self::spawn_all(ids, &processor, &semaphore).await {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Failed to reclaim stale deliveries: {}", e),
                    }
                }
            }
        }
    }

    async fn spawn_all(ids: Vec<JobId>, processor: &JobProcessor, semaphore: &Arc<Semaphore>) -> bool {
        for id in ids {
            let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
                return false;
            };
            let processor = processor.clone();
            tokio::spawn(async move {
                let _permit = permit;
                processor.process(id).await;
            });
        }
        true
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}
