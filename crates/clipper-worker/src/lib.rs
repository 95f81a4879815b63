//! Clip job worker.
//!
//! This crate provides:
//! - The per-job algorithm: claim, clip with progress, record the outcome
//! - A concurrency-limited executor that consumes the task queue
//! - Recovery of deliveries stranded by crashed consumers
//! - Graceful shutdown

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod processor;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use processor::{ffmpeg_clipper, JobOutcome, JobProcessor};
