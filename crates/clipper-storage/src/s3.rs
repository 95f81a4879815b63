//! S3-compatible artifact store (AWS S3, Cloudflare R2, MinIO).

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};
use url::Url;

use crate::error::{StorageError, StorageResult};
use crate::store::{validate_key, ArtifactStore};

/// Configuration for the S3 store.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Region ("auto" for R2)
    pub region: String,
    /// Prepended to every key
    pub prefix: String,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let required = |name: &str| {
            std::env::var(name).map_err(|_| StorageError::config_error(format!("{name} not set")))
        };

        Ok(Self {
            endpoint_url: required("S3_ENDPOINT_URL")?,
            access_key_id: required("S3_ACCESS_KEY_ID")?,
            secret_access_key: required("S3_SECRET_ACCESS_KEY")?,
            bucket: required("S3_BUCKET")?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
            prefix: std::env::var("S3_PREFIX").unwrap_or_else(|_| "clips/".to_string()),
        })
    }
}

#[derive(Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3ArtifactStore {
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "clipper",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        info!("S3 artifact store at s3://{}/{}", config.bucket, config.prefix);
        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket,
            prefix: config.prefix,
        }
    }

    fn object_key(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        Ok(format!("{}{}", self.prefix, key))
    }

    fn locator_for(&self, object_key: &str) -> String {
        format!("s3://{}/{}", self.bucket, object_key)
    }

    /// Split `s3://bucket/key` into its object key, checking the bucket.
    fn parse_locator(&self, locator: &str) -> StorageResult<String> {
        let foreign = || StorageError::ForeignLocator(locator.to_string());
        let url = Url::parse(locator).map_err(|_| foreign())?;
        if url.scheme() != "s3" || url.host_str() != Some(self.bucket.as_str()) {
            return Err(foreign());
        }

        let key = url.path().trim_start_matches('/');
        if key.is_empty() {
            return Err(foreign());
        }
        Ok(key.to_string())
    }

    async fn upload(&self, key: &str, body: ByteStream) -> StorageResult<String> {
        let object_key = self.object_key(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(body)
            .content_type(content_type_for(key))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(self.locator_for(&object_key))
    }
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StorageResult<String> {
        debug!("Uploading {} bytes to {}", bytes.len(), key);
        self.upload(key, ByteStream::from(bytes)).await
    }

    async fn put_file(&self, key: &str, path: &Path) -> StorageResult<String> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        let locator = self.upload(key, body).await?;
        info!("Uploaded {} to {}", path.display(), locator);
        Ok(locator)
    }

    async fn get(&self, locator: &str) -> StorageResult<Vec<u8>> {
        let key = self.parse_locator(locator)?;
        debug!("Downloading {}", locator);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(locator)
                } else {
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    fn owns(&self, locator: &str) -> bool {
        self.parse_locator(locator).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3ArtifactStore {
        S3ArtifactStore::new(S3Config {
            endpoint_url: "http://localhost:9000".to_string(),
            access_key_id: "test".to_string(),
            secret_access_key: "test".to_string(),
            bucket: "media".to_string(),
            region: "auto".to_string(),
            prefix: "clips/".to_string(),
        })
    }

    #[test]
    fn test_locator_shape() {
        let store = store();
        let key = store.object_key("J.mp4").unwrap();
        assert_eq!(store.locator_for(&key), "s3://media/clips/J.mp4");
        assert_eq!(
            store.parse_locator("s3://media/clips/J.mp4").unwrap(),
            "clips/J.mp4"
        );
    }

    #[test]
    fn test_ownership() {
        let store = store();
        assert!(store.owns("s3://media/in.mp4"));
        assert!(!store.owns("s3://other/in.mp4"));
        assert!(!store.owns("s3://media/"));
        assert!(!store.owns("https://example.com/in.mp4"));
        assert!(!store.owns("/tmp/in.mp4"));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("a.mp4"), "video/mp4");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
