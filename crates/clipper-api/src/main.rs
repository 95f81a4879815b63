//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipper_api::{create_router, metrics, ApiConfig, AppState, JobSweeper, SweepConfig};
use clipper_worker::{ffmpeg_clipper, JobExecutor, JobProcessor, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Install rustls crypto provider (required for rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

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

    info!("Starting clipper-api");

    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);

    let state = match AppState::from_env(config.clone()).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create application state: {:#}", e);
            std::process::exit(1);
        }
    };

    let metrics_handle = if config.metrics_enabled {
        match metrics::init_metrics() {
            Ok(handle) => {
                info!("Prometheus metrics enabled at /metrics");
                Some(handle)
            }
            Err(e) => {
                error!("Failed to install Prometheus recorder: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = JobSweeper::new(
        Arc::clone(&state.store),
        Arc::clone(&state.queue),
        SweepConfig::from_env(),
    );
    let sweeper_task = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { sweeper.run(shutdown_rx).await }
    });

    let executor = if config.embedded_workers > 0 {
        match embedded_executor(&state, config.embedded_workers) {
            Ok(executor) => Some(Arc::new(executor)),
            Err(e) => {
                error!("Failed to start embedded workers: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        None
    };
    let executor_task = executor.as_ref().map(|executor| {
        let executor = Arc::clone(executor);
        tokio::spawn(async move { executor.run().await })
    });

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid bind address");
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!("Server error: {}", e);
    }

    let _ = shutdown_tx.send(true);
    if let Some(executor) = executor {
        executor.shutdown();
    }
    if let Some(task) = executor_task {
        task.await.ok();
    }
    sweeper_task.await.ok();

    info!("Server shutdown complete");
}

/// Workers sharing the API's store and queue.
fn embedded_executor(state: &AppState, workers: usize) -> clipper_worker::WorkerResult<JobExecutor> {
    let config = WorkerConfig {
        max_concurrent_jobs: workers,
        ..WorkerConfig::from_env()
    };
    info!("Starting {} embedded workers", workers);

    let clipper = ffmpeg_clipper(&config, Arc::clone(&state.artifacts))?;
    let processor = JobProcessor::new(
        Arc::clone(&state.store),
        Arc::clone(&state.queue),
        clipper,
        config.job_timeout,
    );
    Ok(JobExecutor::new(config, Arc::clone(&state.queue), processor))
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Received shutdown signal");
}
