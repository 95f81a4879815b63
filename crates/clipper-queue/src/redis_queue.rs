//! Task queue using Redis Streams.
//!
//! Ids are XADDed to a stream and read through a consumer group, so each
//! entry is delivered to one consumer and stays in its pending list until
//! acked. An admission key per id rejects duplicate enqueues; a delivery
//! counter per id drives the dead-letter decision on nack.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::{AsyncCommands, RedisResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use clipper_models::JobId;

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::message::QueueMessage;
use crate::queue::{NackOutcome, TaskQueue};

/// How long one XREADGROUP call blocks before polling again.
const BLOCK_MS: u64 = 5_000;

/// Upper bound on admission and delivery bookkeeping keys.
const BOOKKEEPING_TTL_SECS: i64 = 86_400;

pub struct RedisTaskQueue {
    client: redis::Client,
    conn: MultiplexedConnection,
    config: QueueConfig,
    consumer_name: String,
    /// Dedicated connection for blocking reads, opened on first use.
    blocking: Mutex<Option<MultiplexedConnection>>,
    /// Stream entry currently held by this consumer, per job id.
    in_flight: Mutex<HashMap<JobId, String>>,
}

impl RedisTaskQueue {
    /// Connect and create the consumer group if it does not exist yet.
    pub async fn connect(config: QueueConfig, consumer_name: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&config.stream_name)
            .arg(&config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(Self {
            client,
            conn,
            config,
            consumer_name: consumer_name.into(),
            blocking: Mutex::new(None),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Blocking reads get their own connection so they never stall acks.
    async fn blocking_conn(&self) -> QueueResult<MultiplexedConnection> {
        let mut slot = self.blocking.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    fn admitted_key(&self, id: &JobId) -> String {
        format!("{}:admitted:{}", self.config.stream_name, id)
    }

    fn deliveries_key(&self, id: &JobId) -> String {
        format!("{}:deliveries:{}", self.config.stream_name, id)
    }

    async fn add_entry(&self, id: &JobId) -> QueueResult<String> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&QueueMessage::new(id.clone()))?;
        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;
        Ok(message_id)
    }

    async fn remove_entry(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Decode an entry and record it as held by this consumer. Malformed
    /// entries are dropped from the stream.
    async fn accept(&self, entry: StreamId) -> QueueResult<Option<JobId>> {
        let message = match entry.get::<String>("job") {
            Some(payload) => serde_json::from_str::<QueueMessage>(&payload),
            None => {
                warn!("Stream entry {} has no payload", entry.id);
                self.remove_entry(&entry.id).await?;
                return Ok(None);
            }
        };

        let id = match message {
            Ok(message) => message.job_id,
            Err(e) => {
                warn!("Failed to parse queue payload {}: {}", entry.id, e);
                self.remove_entry(&entry.id).await?;
                return Ok(None);
            }
        };

        let mut conn = self.conn.clone();
        let key = self.deliveries_key(&id);
        let delivered: u32 = conn.incr(&key, 1).await?;
        conn.expire::<_, ()>(&key, BOOKKEEPING_TTL_SECS).await?;

        self.in_flight.lock().await.insert(id.clone(), entry.id);
        debug!(job_id = %id, delivered, "Dequeued job");
        Ok(Some(id))
    }

    async fn take_in_flight(&self, id: &JobId) -> QueueResult<String> {
        self.in_flight
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| QueueError::NotInFlight(id.clone()))
    }

    async fn forget(&self, id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&[self.admitted_key(id), self.deliveries_key(id)])
            .await?;
        Ok(())
    }

    /// Entries currently in the dead-letter stream.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn.clone();

        let admitted: bool = redis::cmd("SET")
            .arg(self.admitted_key(id))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(BOOKKEEPING_TTL_SECS)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if !admitted {
            warn!(job_id = %id, "Duplicate enqueue rejected");
            return Err(QueueError::Duplicate(id.clone()));
        }

        match self.add_entry(id).await {
            Ok(message_id) => {
                info!(job_id = %id, "Enqueued job with message ID {}", message_id);
                Ok(())
            }
            Err(e) => {
                // Release the admission so a later enqueue can retry.
                conn.del::<_, ()>(self.admitted_key(id)).await.ok();
                Err(e)
            }
        }
    }

    async fn dequeue(&self) -> QueueResult<JobId> {
        let mut conn = self.blocking_conn().await?;
        loop {
            let reply: RedisResult<Option<StreamReadReply>> = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&self.config.consumer_group)
                .arg(&self.consumer_name)
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(BLOCK_MS)
                .arg("STREAMS")
                .arg(&self.config.stream_name)
                .arg(">")
                .query_async(&mut conn)
                .await;
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    if e.is_io_error() || e.is_connection_dropped() {
                        // Reconnect on the next call.
                        *self.blocking.lock().await = None;
                    }
                    return Err(e.into());
                }
            };

            let entries = reply.into_iter().flat_map(|r| r.keys).flat_map(|key| key.ids);
            for entry in entries {
                if let Some(id) = self.accept(entry).await? {
                    return Ok(id);
                }
            }
        }
    }

    async fn ack(&self, id: &JobId) -> QueueResult<()> {
        let message_id = self.take_in_flight(id).await?;
        self.remove_entry(&message_id).await?;
        self.forget(id).await?;
        debug!(job_id = %id, "Acknowledged job");
        Ok(())
    }

    async fn nack(&self, id: &JobId) -> QueueResult<NackOutcome> {
        let message_id = self.take_in_flight(id).await?;
        let mut conn = self.conn.clone();
        let delivered: Option<u32> = conn.get(self.deliveries_key(id)).await?;
        let delivered = delivered.unwrap_or_default();

        if delivered >= self.config.max_redeliveries {
            let payload = serde_json::to_string(&QueueMessage::new(id.clone()))?;
            redis::cmd("XADD")
                .arg(&self.config.dlq_stream_name)
                .arg("*")
                .arg("job")
                .arg(&payload)
                .arg("original_id")
                .arg(&message_id)
                .arg("deliveries")
                .arg(delivered)
                .query_async::<()>(&mut conn)
                .await?;
            self.remove_entry(&message_id).await?;
            self.forget(id).await?;
            warn!(job_id = %id, delivered, "Moved job to DLQ");
            return Ok(NackOutcome::DeadLettered);
        }

        // Re-add first so the id is never absent from the stream.
        self.add_entry(id).await?;
        self.remove_entry(&message_id).await?;
        debug!(job_id = %id, delivered, "Requeued job");
        Ok(NackOutcome::Requeued)
    }

    async fn reclaim_stale(&self, min_idle: Duration) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn.clone();
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(10)
            .query_async(&mut conn)
            .await?;
        if pending.ids.is_empty() {
            return Ok(Vec::new());
        }

        // XCLAIM re-checks the idle time, so a racing consumer wins cleanly.
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.consumer_name)
            .arg(min_idle_ms);
        for entry in &pending.ids {
            cmd.arg(&entry.id);
        }
        let claimed: StreamClaimReply = cmd.query_async(&mut conn).await?;

        let mut ids = Vec::new();
        for entry in claimed.ids {
            if let Some(id) = self.accept(entry).await? {
                info!(job_id = %id, "Reclaimed stale delivery");
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue(consumer: &str) -> RedisTaskQueue {
        let config = QueueConfig {
            stream_name: format!("clipper-test:{}", JobId::new()),
            ..QueueConfig::default()
        };
        RedisTaskQueue::connect(config, consumer).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_enqueue_dequeue_ack() {
        let queue = queue("w1").await;
        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();
        assert!(matches!(queue.enqueue(&id).await, Err(QueueError::Duplicate(_))));

        assert_eq!(queue.dequeue().await.unwrap(), id);
        queue.ack(&id).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_dequeue_reuses_blocking_connection() {
        let queue = queue("w1").await;
        let mut client_ids = Vec::new();

        for _ in 0..2 {
            let id = JobId::new();
            queue.enqueue(&id).await.unwrap();
            assert_eq!(queue.dequeue().await.unwrap(), id);
            queue.ack(&id).await.unwrap();

            let mut conn = queue.blocking_conn().await.unwrap();
            let client_id: i64 = redis::cmd("CLIENT")
                .arg("ID")
                .query_async(&mut conn)
                .await
                .unwrap();
            client_ids.push(client_id);
        }

        assert_eq!(client_ids[0], client_ids[1]);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_nack_dead_letters_after_budget() {
        let queue = queue("w1").await;
        let id = JobId::new();
        queue.enqueue(&id).await.unwrap();

        for _ in 1..queue.config.max_redeliveries {
            queue.dequeue().await.unwrap();
            assert_eq!(queue.nack(&id).await.unwrap(), NackOutcome::Requeued);
        }
        queue.dequeue().await.unwrap();
        assert_eq!(queue.nack(&id).await.unwrap(), NackOutcome::DeadLettered);
        assert!(queue.dlq_len().await.unwrap() >= 1);
    }
}
