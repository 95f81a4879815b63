use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use clipper_media::{ClipFailure, ClipOutput, ClipRequest, Clipper, ProgressSink};
use clipper_models::{Job, JobId, JobState};
use clipper_queue::{InMemoryTaskQueue, TaskQueue};
use clipper_store::{InMemoryJobStore, JobStore, StoreError, StoreResult};
use clipper_worker::{JobExecutor, JobOutcome, JobProcessor, WorkerConfig};

/// Clipper that replays a fixed progress script and outcome.
struct ScriptedClipper {
    progress: Vec<u8>,
    failure: Option<String>,
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedClipper {
    fn succeeding(progress: Vec<u8>) -> Self {
        Self {
            progress,
            failure: None,
            delay: Duration::ZERO,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::succeeding(vec![5])
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::succeeding(vec![20, 60])
        }
    }
}

#[async_trait]
impl Clipper for ScriptedClipper {
    async fn run(&self, request: &ClipRequest, progress: ProgressSink) -> Result<ClipOutput, ClipFailure> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        for p in &self.progress {
            progress(*p);
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        match &self.failure {
            Some(reason) => Err(ClipFailure::new(reason.clone())),
            None => Ok(ClipOutput {
                locator: format!("/tmp/clipper/clips/{}", request.artifact_key()),
            }),
        }
    }
}

/// Clipper that reports some progress and then panics.
struct PanickingClipper;

#[async_trait]
impl Clipper for PanickingClipper {
    async fn run(&self, _request: &ClipRequest, progress: ProgressSink) -> Result<ClipOutput, ClipFailure> {
        progress(40);
        tokio::task::yield_now().await;
        panic!("decoder state corrupted");
    }
}

/// Store wrapper that records progress writes and can refuse them.
struct RecordingStore {
    inner: InMemoryJobStore,
    progress_writes: Mutex<Vec<i64>>,
    reject_progress: bool,
}

impl RecordingStore {
    fn new(reject_progress: bool) -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            progress_writes: Mutex::new(Vec::new()),
            reject_progress,
        }
    }

    fn writes(&self) -> Vec<i64> {
        self.progress_writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create(&self, source: &str, start: f64, end: f64) -> StoreResult<JobId> {
        self.inner.create(source, start, end).await
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        self.inner.get(id).await
    }

    async fn claim_for_execution(&self, id: &JobId) -> StoreResult<Job> {
        self.inner.claim_for_execution(id).await
    }

    async fn update_progress(&self, id: &JobId, percent: i64) -> StoreResult<()> {
        self.progress_writes.lock().unwrap().push(percent);
        if self.reject_progress {
            return Err(StoreError::config("progress writes disabled"));
        }
        self.inner.update_progress(id, percent).await
    }

    async fn complete(&self, id: &JobId, locator: &str) -> StoreResult<()> {
        self.inner.complete(id, locator).await
    }

    async fn fail(&self, id: &JobId, detail: &str) -> StoreResult<()> {
        self.inner.fail(id, detail).await
    }

    async fn list_by_state(&self, state: JobState) -> StoreResult<Vec<Job>> {
        self.inner.list_by_state(state).await
    }

    async fn fail_if_stale(&self, id: &JobId, cutoff: DateTime<Utc>, detail: &str) -> StoreResult<bool> {
        self.inner.fail_if_stale(id, cutoff, detail).await
    }

    async fn purge_terminal(&self, id: &JobId, cutoff: DateTime<Utc>) -> StoreResult<bool> {
        self.inner.purge_terminal(id, cutoff).await
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct Harness {
    store: Arc<RecordingStore>,
    queue: Arc<InMemoryTaskQueue>,
    processor: JobProcessor,
}

fn harness(clipper: impl Clipper + 'static, timeout: Option<Duration>, reject_progress: bool) -> Harness {
    let store = Arc::new(RecordingStore::new(reject_progress));
    let queue = Arc::new(InMemoryTaskQueue::default());
    let processor = JobProcessor::new(
        store.clone(),
        queue.clone(),
        Arc::new(clipper),
        timeout,
    );
    Harness {
        store,
        queue,
        processor,
    }
}

impl Harness {
    /// Submit a job and take its delivery off the queue.
    async fn deliver(&self) -> JobId {
        let id = self.store.create("s3://in.mp4", 10.0, 20.0).await.unwrap();
        self.queue.enqueue(&id).await.unwrap();
        assert_eq!(self.queue.dequeue().await.unwrap(), id);
        id
    }
}

#[tokio::test]
async fn test_successful_job() {
    let h = harness(ScriptedClipper::succeeding(vec![0, 10, 50, 40, 50, 90]), None, false);
    let id = h.deliver().await;

    let outcome = h.processor.process(id.clone()).await;
    let expected = format!("/tmp/clipper/clips/{id}.mp4");
    assert_eq!(
        outcome,
        JobOutcome::Succeeded {
            result_locator: expected.clone()
        }
    );

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.progress_percent, 100);
    assert_eq!(job.result_locator.as_deref(), Some(expected.as_str()));
    assert!(job.error_detail.is_none());
    assert_eq!(h.queue.in_flight().await, 0);
}

#[tokio::test]
async fn test_progress_writes_only_increase() {
    let h = harness(ScriptedClipper::succeeding(vec![10, 50, 40, 50, 90, 100, 120]), None, false);
    let id = h.deliver().await;
    h.processor.process(id).await;

    let writes = h.store.writes();
    assert_eq!(writes, vec![10, 50, 90, 100]);
}

#[tokio::test]
async fn test_clip_failure_is_recorded_verbatim() {
    let h = harness(ScriptedClipper::failing("unsupported codec"), None, false);
    let id = h.deliver().await;

    let outcome = h.processor.process(id.clone()).await;
    assert_eq!(
        outcome,
        JobOutcome::Failed {
            reason: "unsupported codec".to_string()
        }
    );

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error_detail.as_deref(), Some("unsupported codec"));
    assert!(job.result_locator.is_none());
}

#[tokio::test]
async fn test_already_claimed_delivery_is_dropped() {
    let h = harness(ScriptedClipper::succeeding(vec![50]), None, false);
    let id = h.deliver().await;
    h.store.claim_for_execution(&id).await.unwrap();

    assert_eq!(h.processor.process(id.clone()).await, JobOutcome::AlreadyClaimed);

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Running);
    assert_eq!(job.progress_percent, 0);
    assert_eq!(h.queue.in_flight().await, 0);
}

#[tokio::test]
async fn test_unknown_id_is_acked() {
    let h = harness(ScriptedClipper::succeeding(vec![]), None, false);
    let id = JobId::new();
    h.queue.enqueue(&id).await.unwrap();
    h.queue.dequeue().await.unwrap();

    assert_eq!(h.processor.process(id).await, JobOutcome::NotFound);
    assert_eq!(h.queue.in_flight().await, 0);
}

#[tokio::test]
async fn test_progress_failures_do_not_abort() {
    let h = harness(ScriptedClipper::succeeding(vec![25, 75]), None, true);
    let id = h.deliver().await;

    let outcome = h.processor.process(id.clone()).await;
    assert!(matches!(outcome, JobOutcome::Succeeded { .. }));
    assert_eq!(h.store.writes(), vec![25, 75]);
    assert_eq!(h.store.get(&id).await.unwrap().state, JobState::Succeeded);
}

#[tokio::test]
async fn test_timeout_fails_job() {
    let h = harness(
        ScriptedClipper::slow(Duration::from_secs(30)),
        Some(Duration::from_millis(50)),
        false,
    );
    let id = h.deliver().await;

    let outcome = h.processor.process(id.clone()).await;
    let JobOutcome::Failed { reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(reason.starts_with("Timeout"), "{reason}");
    assert_eq!(h.store.get(&id).await.unwrap().state, JobState::Failed);
}

#[tokio::test]
async fn test_clipper_panic_fails_job() {
    let h = harness(PanickingClipper, None, false);
    let id = h.deliver().await;

    let outcome = h.processor.process(id.clone()).await;
    let JobOutcome::Failed { reason } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(reason, "Clipper panicked: decoder state corrupted");

    let job = h.store.get(&id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.progress_percent, 40);
    assert_eq!(job.error_detail.as_deref(), Some(reason.as_str()));
    assert_eq!(h.queue.in_flight().await, 0);
}

#[tokio::test]
async fn test_executor_runs_jobs_within_concurrency_limit() {
    let store = Arc::new(InMemoryJobStore::new());
    let queue = Arc::new(InMemoryTaskQueue::default());
    let clipper = Arc::new(ScriptedClipper::slow(Duration::from_millis(30)));

    let config = WorkerConfig {
        max_concurrent_jobs: 2,
        shutdown_timeout: Duration::from_secs(5),
        ..WorkerConfig::default()
    };
    let processor = JobProcessor::new(store.clone(), queue.clone(), clipper.clone(), None);
    let executor = Arc::new(JobExecutor::new(config, queue.clone(), processor));

    let runner = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move { executor.run().await })
    };

    let mut ids = Vec::new();
    for _ in 0..6 {
        let id = store.create("https://cdn.example.com/in.mp4", 0.0, 5.0).await.unwrap();
        queue.enqueue(&id).await.unwrap();
        ids.push(id);
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let done = store.list_by_state(JobState::Succeeded).await.unwrap().len();
            if done == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs did not finish");

    assert!(clipper.peak.load(Ordering::SeqCst) <= 2);

    executor.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("executor did not stop")
        .unwrap();
}
