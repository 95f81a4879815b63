//! Durable job records.
//!
//! This crate provides:
//! - The `JobStore` contract (create, get, claim, progress, complete, fail)
//! - An in-process backend with per-job locking
//! - A Redis backend with Lua-scripted atomic transitions
//! - Sweep helpers used by the stale job sweeper

pub mod config;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use config::{connect, StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryJobStore;
pub use redis_store::RedisJobStore;
pub use store::JobStore;
