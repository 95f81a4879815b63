//! In-process task queue.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use clipper_models::JobId;

use crate::error::{QueueError, QueueResult};
use crate::queue::{NackOutcome, TaskQueue};

#[derive(Default)]
struct State {
    ready: VecDeque<JobId>,
    in_flight: HashSet<JobId>,
    /// Deliveries made so far for every admitted id.
    deliveries: HashMap<JobId, u32>,
    dead_letters: Vec<JobId>,
    closed: bool,
}

pub struct InMemoryTaskQueue {
    state: Mutex<State>,
    notify: Notify,
    max_deliveries: u32,
}

impl InMemoryTaskQueue {
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            max_deliveries: max_deliveries.max(1),
        }
    }

    /// Wake every waiting consumer with `Closed`. Queued ids stay queued.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn dead_letters(&self) -> Vec<JobId> {
        self.state.lock().await.dead_letters.clone()
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, id: &JobId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        if state.deliveries.contains_key(id) {
            return Err(QueueError::Duplicate(id.clone()));
        }

        state.deliveries.insert(id.clone(), 0);
        state.ready.push_back(id.clone());
        drop(state);

        self.notify.notify_one();
        debug!(job_id = %id, "Enqueued job");
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<JobId> {
        loop {
            // Register before checking so a concurrent enqueue is not missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(id) = state.ready.pop_front() {
                    state.in_flight.insert(id.clone());
                    *state.deliveries.entry(id.clone()).or_default() += 1;
                    // Another consumer may be waiting on the next id.
                    if !state.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return Ok(id);
                }
                if state.closed {
                    return Err(QueueError::Closed);
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, id: &JobId) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if !state.in_flight.remove(id) {
            return Err(QueueError::NotInFlight(id.clone()));
        }
        state.deliveries.remove(id);
        Ok(())
    }

    async fn nack(&self, id: &JobId) -> QueueResult<NackOutcome> {
        let mut state = self.state.lock().await;
        if !state.in_flight.remove(id) {
            return Err(QueueError::NotInFlight(id.clone()));
        }

        let delivered = state.deliveries.get(id).copied().unwrap_or_default();
        if delivered >= self.max_deliveries {
            state.deliveries.remove(id);
            state.dead_letters.push(id.clone());
            warn!(job_id = %id, delivered, "Moved job to dead letters");
            return Ok(NackOutcome::DeadLettered);
        }

        state.ready.push_back(id.clone());
        drop(state);
        self.notify.notify_one();
        debug!(job_id = %id, delivered, "Requeued job");
        Ok(NackOutcome::Requeued)
    }

    async fn len(&self) -> QueueResult<u64> {
        Ok(self.state.lock().await.ready.len() as u64)
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_delivery() {
        let queue = InMemoryTaskQueue::default();
        let a = JobId::new();
        let b = JobId::new();
        queue.enqueue(&a).await.unwrap();
        queue.enqueue(&b).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        assert_eq!(queue.dequeue().await.unwrap(), a);
        assert_eq!(queue.dequeue().await.unwrap(), b);
        assert_eq!(queue.in_flight().await, 2);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_rejected_until_acked() {
        let queue = InMemoryTaskQueue::default();
        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();
        assert!(matches!(
            queue.enqueue(&id).await,
            Err(QueueError::Duplicate(_))
        ));

        queue.dequeue().await.unwrap();
        assert!(matches!(
            queue.enqueue(&id).await,
            Err(QueueError::Duplicate(_))
        ));

        queue.ack(&id).await.unwrap();
        queue.enqueue(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got, id);
    }

    #[tokio::test]
    async fn test_each_id_goes_to_one_consumer() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move { queue.dequeue().await.unwrap() })
            })
            .collect();

        let mut ids = HashSet::new();
        for _ in 0..4 {
            let id = JobId::new();
            queue.enqueue(&id).await.unwrap();
            ids.insert(id);
        }

        let mut got = HashSet::new();
        for consumer in consumers {
            let id = tokio::time::timeout(Duration::from_secs(1), consumer)
                .await
                .unwrap()
                .unwrap();
            assert!(got.insert(id));
        }
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn test_nack_redelivers_then_dead_letters() {
        let queue = InMemoryTaskQueue::new(2);
        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();

        queue.dequeue().await.unwrap();
        assert_eq!(queue.nack(&id).await.unwrap(), NackOutcome::Requeued);

        assert_eq!(queue.dequeue().await.unwrap(), id);
        assert_eq!(queue.nack(&id).await.unwrap(), NackOutcome::DeadLettered);
        assert_eq!(queue.dead_letters().await, vec![id.clone()]);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settle_requires_delivery() {
        let queue = InMemoryTaskQueue::default();
        let id = JobId::new();
        assert!(matches!(queue.ack(&id).await, Err(QueueError::NotInFlight(_))));
        queue.enqueue(&id).await.unwrap();
        assert!(matches!(queue.nack(&id).await, Err(QueueError::NotInFlight(_))));
    }

    #[tokio::test]
    async fn test_close_wakes_consumers() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.close().await;
        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(QueueError::Closed)));
    }
}
