//! Storage backend selection.

use std::str::FromStr;
use std::sync::Arc;

use crate::error::{StorageError, StorageResult};
use crate::local::LocalArtifactStore;
use crate::s3::{S3ArtifactStore, S3Config};
use crate::store::ArtifactStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "s3" | "r2" => Ok(StorageBackend::S3),
            other => Err(StorageError::config_error(format!(
                "unknown ARTIFACT_STORE backend: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend
    pub artifact_dir: String,
    /// Only read when the backend is S3
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            artifact_dir: "/tmp/clipper/clips".to_string(),
            s3: None,
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("ARTIFACT_STORE") {
            Ok(value) => value.parse()?,
            Err(_) => StorageBackend::Local,
        };
        let s3 = match backend {
            StorageBackend::S3 => Some(S3Config::from_env()?),
            StorageBackend::Local => None,
        };

        Ok(Self {
            backend,
            artifact_dir: std::env::var("ARTIFACT_DIR")
                .unwrap_or_else(|_| "/tmp/clipper/clips".to_string()),
            s3,
        })
    }
}

/// Build the configured artifact store.
pub async fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn ArtifactStore>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(
            LocalArtifactStore::new(&config.artifact_dir).await?,
        )),
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .clone()
                .ok_or_else(|| StorageError::config_error("S3 backend selected without S3 config"))?;
            Ok(Arc::new(S3ArtifactStore::new(s3)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("R2".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert!("gcs".parse::<StorageBackend>().is_err());
    }

    #[tokio::test]
    async fn test_s3_requires_config() {
        let config = StorageConfig {
            backend: StorageBackend::S3,
            ..StorageConfig::default()
        };
        assert!(matches!(
            connect(&config).await,
            Err(StorageError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_local() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            artifact_dir: dir.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let store = connect(&config).await.unwrap();
        let locator = store.put("x.mp4", vec![1, 2]).await.unwrap();
        assert!(store.owns(&locator));
    }
}
