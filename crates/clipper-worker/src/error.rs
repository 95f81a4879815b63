//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    Store(#[from] clipper_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] clipper_queue::QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] clipper_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] clipper_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
