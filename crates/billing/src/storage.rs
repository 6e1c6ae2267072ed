//! Document storage collaborator.
//!
//! The verification workflow only needs a single upload contract; the
//! backend is an S3-compatible object store with an optional custom
//! endpoint for MinIO and friends.

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Storage configuration error: {0}")]
    ConfigError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Upload contract consumed by the verification workflow. The returned
/// storage path is what gets persisted on the verification row.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        content_type: &str,
        folder: &str,
    ) -> StorageResult<String>;
}

/// S3-compatible document storage.
pub struct S3DocumentStorage {
    store: AmazonS3,
    bucket: String,
}

impl S3DocumentStorage {
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(Self { store, bucket })
    }

    pub fn from_env() -> StorageResult<Self> {
        let bucket = std::env::var("STORAGE_BUCKET")
            .map_err(|_| StorageError::ConfigError("STORAGE_BUCKET not set".to_string()))?;
        let region = std::env::var("STORAGE_REGION")
            .or_else(|_| std::env::var("AWS_REGION"))
            .unwrap_or_else(|_| "us-east-1".to_string());
        let endpoint_url = std::env::var("STORAGE_ENDPOINT").ok();

        Self::new(bucket, region, endpoint_url)
    }

    /// Keys are folder-scoped with a random prefix so resubmitted files
    /// never collide or overwrite.
    fn generate_key(folder: &str, filename: &str) -> String {
        let safe_name: String = filename
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}/{}_{}", folder.trim_matches('/'), Uuid::new_v4(), safe_name)
    }
}

#[async_trait]
impl DocumentStorage for S3DocumentStorage {
    async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        _content_type: &str,
        folder: &str,
    ) -> StorageResult<String> {
        let key = Self::generate_key(folder, filename);
        let size = data.len() as u64;
        let location = Path::from(key.clone());

        let start = std::time::Instant::now();
        self.store
            .put(&location, PutPayload::from(data))
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    "Document upload failed"
                );
                StorageError::UploadFailed(e.to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Document uploaded"
        );

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_folder_scoped_and_sanitized() {
        let key = S3DocumentStorage::generate_key("student-verifications/t1/u1", "enrol ment?.pdf");
        assert!(key.starts_with("student-verifications/t1/u1/"));
        assert!(key.ends_with("_enrol_ment_.pdf"));
        assert!(!key.contains(' '));
        assert!(!key.contains('?'));
    }

    #[test]
    fn generated_keys_never_collide() {
        let a = S3DocumentStorage::generate_key("docs", "same.pdf");
        let b = S3DocumentStorage::generate_key("docs", "same.pdf");
        assert_ne!(a, b);
    }
}
