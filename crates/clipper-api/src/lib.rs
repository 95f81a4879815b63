//! Axum HTTP API for clip jobs.
//!
//! This crate provides:
//! - Job submission, status polling, result lookup and artifact download
//! - The legacy clip API routes as aliases
//! - API key authentication, rate limiting and security headers
//! - Prometheus metrics
//! - An opt-in sweeper for stalled and expired jobs

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use auth::{AllowAll, ApiKeyAuthenticator, Authenticator, Credentials, Identity};
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{JobSweeper, SubmissionService, SweepConfig};
pub use state::AppState;
