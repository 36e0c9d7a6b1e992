//! Blob storage backends
//!
//! Chunk artifacts and final assets both go through [`BlobStore`]. Supports
//! the local filesystem and S3-compatible services (MinIO, Cloudflare R2,
//! Backblaze B2, AWS S3).

mod local;
mod s3_client;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

pub use crate::error::StorageError;
pub use local::LocalBlobStore;
pub use s3_client::S3Client;

use crate::config::{StorageConfig, StorageProvider};

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable key/value blob backend
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, replacing any existing object
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Store the contents of a local file under `key` without buffering it
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()>;

    /// Fetch an object's bytes
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the blob store selected by configuration
pub async fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    match config.provider {
        StorageProvider::Local => {
            let store = LocalBlobStore::new(&config.local_path).await?;
            Ok(Arc::new(store))
        }
        _ => {
            let client = S3Client::new(config).await?;
            Ok(Arc::new(client))
        }
    }
}
