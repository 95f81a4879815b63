//! Local-disk artifact store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ArtifactStore};

/// Writes artifacts under a root directory. Locators are file paths.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Create the store, creating `root` if needed.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::config_error(format!("cannot create {}: {}", root.display(), e))
        })?;
        info!("Local artifact store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn resolve(&self, locator: &str) -> StorageResult<PathBuf> {
        let path = Path::new(locator);
        let escapes = path
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(&self.root) {
            return Err(StorageError::ForeignLocator(locator.to_string()));
        }
        Ok(path.to_path_buf())
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StorageResult<String> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;
        debug!("Writing {} bytes to {}", bytes.len(), path.display());

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn put_file(&self, key: &str, source: &Path) -> StorageResult<String> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path).await?;

        tokio::fs::copy(source, &path)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;
        info!("Stored {} at {}", source.display(), path.display());
        Ok(path.to_string_lossy().into_owned())
    }

    async fn get(&self, locator: &str) -> StorageResult<Vec<u8>> {
        let path = self.resolve(locator)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(locator))
            }
            Err(e) => Err(StorageError::DownloadFailed(format!("{locator}: {e}"))),
        }
    }

    fn owns(&self, locator: &str) -> bool {
        self.resolve(locator).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("clips")).await.unwrap();

        let locator = store.put("J.mp4", b"clip".to_vec()).await.unwrap();
        assert!(locator.ends_with("/J.mp4"));
        assert!(store.owns(&locator));
        assert_eq!(store.get(&locator).await.unwrap(), b"clip");
    }

    #[tokio::test]
    async fn test_put_file_nested_key() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).await.unwrap();
        let source = dir.path().join("out.mp4");
        tokio::fs::write(&source, b"bytes").await.unwrap();

        let locator = store.put_file("a/b/J.mp4", &source).await.unwrap();
        assert_eq!(store.get(&locator).await.unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys_and_locators() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path().join("clips")).await.unwrap();

        assert!(matches!(
            store.put("../evil.mp4", vec![1]).await,
            Err(StorageError::InvalidKey(_))
        ));

        let outside = dir.path().join("other.mp4");
        let outside = outside.to_string_lossy();
        assert!(!store.owns(&outside));
        assert!(matches!(
            store.get(&outside).await,
            Err(StorageError::ForeignLocator(_))
        ));

        let sneaky = format!("{}/../other.mp4", store.root().display());
        assert!(!store.owns(&sneaky));
        assert!(!store.owns("s3://bucket/x.mp4"));
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::new(dir.path()).await.unwrap();
        let locator = dir.path().join("gone.mp4");

        assert!(matches!(
            store.get(&locator.to_string_lossy()).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
