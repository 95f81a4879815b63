//! Queue configuration and backend selection.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{QueueError, QueueResult};
use crate::memory::InMemoryTaskQueue;
use crate::queue::TaskQueue;
use crate::redis_queue::RedisTaskQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Memory,
    Redis,
}

impl FromStr for QueueBackend {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(QueueBackend::Memory),
            "redis" => Ok(QueueBackend::Redis),
            other => Err(QueueError::config(format!("unknown TASK_QUEUE backend: {other}"))),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Redis URL
    pub redis_url: String,
    /// Stream name for job ids
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Deliveries allowed before a nacked id is dead-lettered
    pub max_redeliveries: u32,
    /// How long a delivery may stay unsettled before another consumer reclaims it
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "clipper:jobs".to_string(),
            consumer_group: "clipper:workers".to_string(),
            dlq_stream_name: "clipper:dlq".to_string(),
            max_redeliveries: 3,
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();
        let backend = match std::env::var("TASK_QUEUE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };

        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_redeliveries: std::env::var("QUEUE_MAX_REDELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_redeliveries),
            visibility_timeout: std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.visibility_timeout),
        })
    }
}

/// Build the configured queue. `consumer_name` identifies this process in
/// the Redis consumer group.
pub async fn connect(config: &QueueConfig, consumer_name: &str) -> QueueResult<Arc<dyn TaskQueue>> {
    match config.backend {
        QueueBackend::Memory => {
            info!("Using in-process task queue");
            Ok(Arc::new(InMemoryTaskQueue::new(config.max_redeliveries)))
        }
        QueueBackend::Redis => Ok(Arc::new(
            RedisTaskQueue::connect(config.clone(), consumer_name).await?,
        )),
    }
}
