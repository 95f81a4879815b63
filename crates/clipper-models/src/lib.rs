//! Shared data models for the clip job service.
//!
//! This crate provides Serde-serializable types for:
//! - Clip jobs and their lifecycle state machine
//! - Clip ranges and offset/timestamp parsing

pub mod job;
pub mod timestamp;

pub use job::{ClipRange, Job, JobId, JobState, RangeError, TransitionError};
pub use timestamp::{format_seconds, parse_timestamp, OffsetValue, TimestampError};
