//! Stream payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clipper_models::JobId;

/// What the Redis queue writes into each stream entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: JobId,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            enqueued_at: Utc::now(),
        }
    }
}
