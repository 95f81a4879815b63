//! Per-job execution.
//!
//! One delivered id goes through: claim in the store, settle the delivery,
//! run the clipper while forwarding progress, then record exactly one
//! terminal transition.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tracing::{debug, Instrument};

use clipper_media::{ClipFailure, ClipRequest, Clipper, FfmpegClipper, FfmpegRunner, ProgressSink};
use clipper_models::JobId;
use clipper_queue::{NackOutcome, TaskQueue};
use clipper_storage::ArtifactStore;
use clipper_store::{JobStore, StoreError, StoreResult};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;

/// Attempts for a terminal write that hits a transient store error.
const TERMINAL_ATTEMPTS: u32 = 3;

/// What happened to one delivered id.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded { result_locator: String },
    Failed { reason: String },
    /// Another worker owns the job, or it already finished.
    AlreadyClaimed,
    /// The id has no job record.
    NotFound,
    /// The claim could not be attempted; the delivery was handed back.
    Redelivered(NackOutcome),
    /// The job ran but its terminal state could not be recorded.
    Unrecorded { error: String },
}

/// Runs delivered job ids against the store and the clipping capability.
#[derive(Clone)]
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    clipper: Arc<dyn Clipper>,
    job_timeout: Option<Duration>,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        clipper: Arc<dyn Clipper>,
        job_timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            queue,
            clipper,
            job_timeout,
        }
    }

    /// Handle one id taken from the queue.
    pub async fn process(&self, id: JobId) -> JobOutcome {
        let logger = JobLogger::new(&id, "clip");
        let span = logger.span();
        self.process_inner(id, logger).instrument(span).await
    }

    async fn process_inner(&self, id: JobId, logger: JobLogger) -> JobOutcome {
        let job = match self.store.claim_for_execution(&id).await {
            Ok(job) => job,
            Err(StoreError::AlreadyClaimed(_)) => {
                debug!(job_id = %id, "Job already claimed, dropping delivery");
                self.settle(&id, &logger).await;
                return JobOutcome::AlreadyClaimed;
            }
            Err(StoreError::NotFound(_)) => {
                logger.log_warning("no job record for delivered id");
                self.settle(&id, &logger).await;
                return JobOutcome::NotFound;
            }
            Err(e) if e.is_transient() => {
                logger.log_warning(&format!("claim failed, handing delivery back: {e}"));
                return match self.queue.nack(&id).await {
                    Ok(outcome) => JobOutcome::Redelivered(outcome),
                    Err(nack_err) => {
                        logger.log_error(&format!("nack failed: {nack_err}"));
                        JobOutcome::Unrecorded {
                            error: e.to_string(),
                        }
                    }
                };
            }
            Err(e) => {
                logger.log_error(&format!("claim failed: {e}"));
                self.settle(&id, &logger).await;
                return JobOutcome::Unrecorded {
                    error: e.to_string(),
                };
            }
        };

        // The store claim is the ownership record from here on.
        self.settle(&id, &logger).await;

        let request = ClipRequest::from(&job);
        logger.log_start(&format!(
            "{} [{}s - {}s]",
            request.source_locator, request.start_offset, request.end_offset
        ));

        let started = Instant::now();
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let forwarder = tokio::spawn(
            forward_progress(Arc::clone(&self.store), id.clone(), rx, stop_rx, logger.clone())
                .in_current_span(),
        );

        let sink: ProgressSink = Arc::new(move |percent: u8| {
            // The receiver only goes away once the run is over.
            let _ = tx.send(percent);
        });
        let result = self.run_clipper(&request, sink).await;

        // No progress write may land after the terminal transition.
        let _ = stop_tx.send(());
        if let Err(e) = forwarder.await {
            logger.log_warning(&format!("progress forwarder ended abnormally: {e}"));
        }

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(output) => {
                let locator = output.locator;
                match self.record(&logger, || self.store.complete(&id, &locator)).await {
                    Ok(()) => {
                        metrics::record_job_completed(elapsed);
                        logger.log_completion(&locator);
                        JobOutcome::Succeeded {
                            result_locator: locator,
                        }
                    }
                    Err(e) => self.unrecorded(&logger, e),
                }
            }
            Err(failure) => {
                let reason = failure.reason;
                match self.record(&logger, || self.store.fail(&id, &reason)).await {
                    Ok(()) => {
                        let label = if reason.starts_with("Timeout") { "timeout" } else { "clip" };
                        metrics::record_job_failed(label, elapsed);
                        logger.log_warning(&format!("clip failed: {reason}"));
                        JobOutcome::Failed { reason }
                    }
                    Err(e) => self.unrecorded(&logger, e),
                }
            }
        }
    }

    async fn run_clipper(
        &self,
        request: &ClipRequest,
        sink: ProgressSink,
    ) -> Result<clipper_media::ClipOutput, ClipFailure> {
        // A panicking clipper must still end in a recorded failure.
        let clipper = Arc::clone(&self.clipper);
        let owned = request.clone();
        let mut handle =
            tokio::spawn(async move { clipper.run(&owned, sink).await }.in_current_span());

        let joined = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(ClipFailure::new(format!(
                        "Timeout: clipping exceeded {} seconds",
                        limit.as_secs()
                    )));
                }
            },
            None => handle.await,
        };
        joined.unwrap_or_else(|e| Err(join_failure(e)))
    }

    /// Acknowledge the delivery; a failed ack only risks a redelivery that
    /// the store claim will reject.
    async fn settle(&self, id: &JobId, logger: &JobLogger) {
        if let Err(e) = self.queue.ack(id).await {
            logger.log_warning(&format!("failed to ack delivery: {e}"));
        }
    }

    /// Write a terminal transition, retrying transient store errors.
    async fn record<F, Fut>(&self, logger: &JobLogger, write: F) -> StoreResult<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        let mut attempt = 1;
        loop {
            match write().await {
                Err(e) if e.is_transient() && attempt < TERMINAL_ATTEMPTS => {
                    logger.log_warning(&format!("terminal write failed (attempt {attempt}): {e}"));
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn unrecorded(&self, logger: &JobLogger, err: StoreError) -> JobOutcome {
        if err.is_ordering_violation() {
            logger.log_error(&format!("terminal transition rejected, job left its Running state: {err}"));
        } else {
            logger.log_error(&format!("terminal transition not recorded: {err}"));
        }
        JobOutcome::Unrecorded {
            error: err.to_string(),
        }
    }
}

fn join_failure(err: JoinError) -> ClipFailure {
    if !err.is_panic() {
        return ClipFailure::new("Clipper task was cancelled");
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    ClipFailure::new(format!("Clipper panicked: {message}"))
}

/// Persist progress values as they arrive, skipping any that do not raise
/// the stored value. Returns the last value written.
async fn forward_progress(
    store: Arc<dyn JobStore>,
    id: JobId,
    mut rx: mpsc::UnboundedReceiver<u8>,
    mut stop: oneshot::Receiver<()>,
    logger: JobLogger,
) -> u8 {
    let mut last = 0u8;
    let mut push = |percent: u8| {
        let store = Arc::clone(&store);
        let id = id.clone();
        let logger = logger.clone();
        let should_write = percent > last && percent <= 100;
        if should_write {
            last = percent;
        }
        async move {
            if !should_write {
                return;
            }
            match store.update_progress(&id, i64::from(percent)).await {
                Ok(()) => logger.log_progress(percent),
                Err(e) => logger.log_warning(&format!("progress {percent}% not saved: {e}")),
            }
        }
    };

    loop {
        tokio::select! {
            biased;
            value = rx.recv() => match value {
                Some(percent) => push(percent).await,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(percent) = rx.try_recv() {
                    push(percent).await;
                }
                break;
            }
        }
    }
    last
}

/// Build the FFmpeg clipper from worker config.
pub fn ffmpeg_clipper(
    config: &WorkerConfig,
    artifacts: Arc<dyn ArtifactStore>,
) -> WorkerResult<Arc<dyn Clipper>> {
    let runner = FfmpegRunner::locate()?;
    Ok(Arc::new(FfmpegClipper::new(
        runner,
        artifacts,
        std::path::Path::new(&config.work_dir).join("work"),
        config.reencode,
    )))
}
