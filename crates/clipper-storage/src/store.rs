//! The artifact store capability.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Stores bytes at an addressable location and reads them back.
///
/// Locators returned by `put` are opaque to callers; only the store that
/// produced a locator can resolve it.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under `key` and return its locator.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StorageResult<String>;

    /// Store the contents of a file under `key`.
    async fn put_file(&self, key: &str, path: &Path) -> StorageResult<String> {
        let bytes = tokio::fs::read(path).await?;
        self.put(key, bytes).await
    }

    /// Read back the bytes behind a locator.
    async fn get(&self, locator: &str) -> StorageResult<Vec<u8>>;

    /// Whether `locator` points into this store.
    fn owns(&self, locator: &str) -> bool;
}

/// Keys are relative, `/`-separated, and never climb out of the store root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if bad {
        return Err(StorageError::invalid_key(key));
    }
    Ok(())
}
