//! Store backend selection.

use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryJobStore;
use crate::redis_store::RedisJobStore;
use crate::store::JobStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(StoreError::config(format!("unknown JOB_STORE backend: {other}"))),
        }
    }
}

/// Job store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Prefix for every key the Redis backend writes
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "clipper".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let backend = match std::env::var("JOB_STORE") {
            Ok(value) => value.parse()?,
            Err(_) => StoreBackend::Memory,
        };

        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("JOB_KEY_PREFIX").unwrap_or_else(|_| "clipper".to_string()),
        })
    }
}

/// Build the configured job store.
pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn JobStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory job store");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
        StoreBackend::Redis => Ok(Arc::new(
            RedisJobStore::connect(&config.redis_url, config.key_prefix.clone()).await?,
        )),
    }
}
