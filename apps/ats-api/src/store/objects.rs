use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload of '{key}' failed: {message}")]
    Upload { key: String, message: String },

    #[error("Removal of '{key}' failed: {message}")]
    Remove { key: String, message: String },
}

/// Object storage for raw resume files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `key` and returns the stored object's path.
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Publicly resolvable URL for a stored path.
    fn public_url(&self, path: &str) -> String;

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError>;
}

/// S3 / MinIO implementation.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base: String,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: String, public_base: String) -> Self {
        Self {
            client,
            bucket,
            public_base: public_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        info!("Uploaded resume to s3://{}/{}", self.bucket, key);
        Ok(key.to_string())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.public_base, self.bucket, path)
    }

    async fn remove(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    warn!("Failed to remove s3://{}/{}: {e}", self.bucket, key);
                    StorageError::Remove {
                        key: key.clone(),
                        message: e.to_string(),
                    }
                })?;
            info!("Removed s3://{}/{}", self.bucket, key);
        }
        Ok(())
    }
}
