//! The task queue contract.

use std::time::Duration;

use async_trait::async_trait;

use clipper_models::JobId;

use crate::error::QueueResult;

/// What happened to a nacked id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Re-admitted for another delivery.
    Requeued,
    /// Delivery budget exhausted; moved to the dead-letter queue.
    DeadLettered,
}

/// Delivers job ids to workers, at most one consumer per id at a time.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Admit an id. Fails with `Duplicate` while the same id is still queued
    /// or in flight.
    async fn enqueue(&self, id: &JobId) -> QueueResult<()>;

    /// Wait until an id is available and hand it to this consumer.
    async fn dequeue(&self) -> QueueResult<JobId>;

    /// The consumer took ownership; the id leaves the queue for good.
    async fn ack(&self, id: &JobId) -> QueueResult<()>;

    /// The consumer could not take the id; redeliver per policy.
    async fn nack(&self, id: &JobId) -> QueueResult<NackOutcome>;

    /// Take over ids another consumer received but never settled within
    /// `min_idle`. Backends without consumer tracking return nothing.
    async fn reclaim_stale(&self, _min_idle: Duration) -> QueueResult<Vec<JobId>> {
        Ok(Vec::new())
    }

    /// Ids waiting for delivery.
    async fn len(&self) -> QueueResult<u64>;

    async fn ping(&self) -> QueueResult<()>;
}
