//! Task queue for clip jobs.
//!
//! This crate provides:
//! - The `TaskQueue` contract (enqueue, blocking dequeue, ack, nack)
//! - An in-process queue for single-binary deployments and tests
//! - A Redis Streams queue with consumer groups, redelivery and a DLQ

pub mod config;
pub mod error;
pub mod memory;
pub mod message;
pub mod queue;
pub mod redis_queue;

pub use config::{connect, QueueBackend, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use memory::InMemoryTaskQueue;
pub use message::QueueMessage;
pub use queue::{NackOutcome, TaskQueue};
pub use redis_queue::RedisTaskQueue;
