//! Clip worker binary.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipper_queue::{QueueBackend, QueueConfig};
use clipper_storage::StorageConfig;
use clipper_store::{StoreBackend, StoreConfig};
use clipper_worker::{ffmpeg_clipper, JobExecutor, JobProcessor, WorkerConfig, WorkerError, WorkerResult};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("clipper=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    info!("Starting clipper-worker");

    let executor = match build_executor().await {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            error!("Failed to start worker: {}", e);
            std::process::exit(1);
        }
    };

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await;
    info!("Worker shutdown complete");
}

async fn build_executor() -> WorkerResult<JobExecutor> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let store_config = StoreConfig::from_env()?;
    let queue_config = QueueConfig::from_env()?;
    // A standalone worker shares nothing with the API unless both use Redis.
    if store_config.backend != StoreBackend::Redis || queue_config.backend != QueueBackend::Redis {
        return Err(WorkerError::config_error(
            "standalone worker requires JOB_STORE=redis and TASK_QUEUE=redis",
        ));
    }

    let consumer_name = format!("worker-{}", uuid::Uuid::new_v4());
    let store = clipper_store::connect(&store_config).await?;
    let queue = clipper_queue::connect(&queue_config, &consumer_name).await?;
    let artifacts = clipper_storage::connect(&StorageConfig::from_env()?).await?;
    let clipper = ffmpeg_clipper(&config, artifacts)?;

    let processor = JobProcessor::new(store, Arc::clone(&queue), clipper, config.job_timeout);
    Ok(JobExecutor::new(config, queue, processor))
}
