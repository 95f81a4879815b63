//! Artifact storage for clip outputs.
//!
//! This crate provides:
//! - The `ArtifactStore` capability (`put` bytes under a key, `get` by locator)
//! - A local-disk store rooted at a directory
//! - An S3-compatible store (AWS, R2, MinIO)

pub mod config;
pub mod error;
pub mod local;
pub mod s3;
pub mod store;

pub use config::{connect, StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use local::LocalArtifactStore;
pub use s3::{S3ArtifactStore, S3Config};
pub use store::{validate_key, ArtifactStore};
