//! Application state.

use std::sync::Arc;

use anyhow::{bail, Context};

use clipper_queue::{QueueBackend, QueueConfig, TaskQueue};
use clipper_storage::{ArtifactStore, StorageConfig};
use clipper_store::{JobStore, StoreBackend, StoreConfig};

use crate::auth::{authenticator_for, Authenticator};
use crate::config::ApiConfig;
use crate::services::SubmissionService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub submissions: SubmissionService,
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    /// Assemble state from already-connected backends.
    pub fn new(
        config: ApiConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn TaskQueue>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let submissions = SubmissionService::new(Arc::clone(&store), Arc::clone(&queue));
        let authenticator = authenticator_for(&config.api_keys);
        Self {
            config,
            store,
            queue,
            artifacts,
            submissions,
            authenticator,
        }
    }

    /// Connect the configured backends.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let store_config = StoreConfig::from_env().context("job store config")?;
        let queue_config = QueueConfig::from_env().context("task queue config")?;
        check_backends(store_config.backend, queue_config.backend, config.embedded_workers)?;

        let consumer_name = format!("api-{}", uuid::Uuid::new_v4());
        let store = clipper_store::connect(&store_config)
            .await
            .context("failed to connect job store")?;
        let queue = clipper_queue::connect(&queue_config, &consumer_name)
            .await
            .context("failed to connect task queue")?;
        let storage_config = StorageConfig::from_env().context("artifact store config")?;
        let artifacts = clipper_storage::connect(&storage_config)
            .await
            .context("failed to open artifact store")?;

        Ok(Self::new(config, store, queue, artifacts))
    }
}

/// In-process backends are only visible to workers in this process.
fn check_backends(store: StoreBackend, queue: QueueBackend, embedded_workers: usize) -> anyhow::Result<()> {
    let in_process = store == StoreBackend::Memory || queue == QueueBackend::Memory;
    if in_process && embedded_workers == 0 {
        bail!("in-memory JOB_STORE/TASK_QUEUE need EMBEDDED_WORKERS > 0");
    }
    Ok(())
}
