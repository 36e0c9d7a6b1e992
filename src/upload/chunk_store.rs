//! Chunk Store
//!
//! Transient storage for uploaded chunks before assembly. Each chunk is a
//! separate blob keyed by session and index, so a retried chunk overwrites
//! its earlier copy and arrival order does not matter.

use std::sync::Arc;

use futures::future::join_all;
use uuid::Uuid;

use super::types::UploadError;
use crate::storage::BlobStore;

const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

/// Chunk artifacts on top of a blob backend
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn BlobStore>,
    prefix: String,
}

impl ChunkStore {
    pub fn new(backend: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Storage key for one chunk
    ///
    /// Indices are zero-padded so keys list in index order.
    pub fn chunk_key(&self, upload_id: Uuid, chunk_index: u32) -> String {
        format!("{}/{}/{:08}.chunk", self.prefix, upload_id, chunk_index)
    }

    /// Store a chunk, replacing any previous copy at the same index
    pub async fn put_chunk(&self, upload_id: Uuid, chunk_index: u32, data: Vec<u8>) -> Result<(), UploadError> {
        let size = data.len();
        self.backend
            .put(&self.chunk_key(upload_id, chunk_index), data, CHUNK_CONTENT_TYPE)
            .await?;

        tracing::debug!(upload_id = %upload_id, chunk_index, size, "Stored chunk");
        Ok(())
    }

    /// Fetch a stored chunk
    pub async fn get_chunk(&self, upload_id: Uuid, chunk_index: u32) -> Result<Vec<u8>, UploadError> {
        match self.backend.get(&self.chunk_key(upload_id, chunk_index)).await {
            Ok(data) => Ok(data),
            Err(e) if e.is_not_found() => Err(UploadError::MissingChunks(vec![chunk_index])),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the chunks at `indices`, returning how many deletions succeeded
    ///
    /// Failures are logged and skipped; leftover chunk blobs are garbage, not
    /// state.
    pub async fn delete_chunks<I>(&self, upload_id: Uuid, indices: I) -> usize
    where
        I: IntoIterator<Item = u32>,
    {
        let deletions = indices.into_iter().map(|index| {
            let key = self.chunk_key(upload_id, index);
            async move {
                match self.backend.delete(&key).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(upload_id = %upload_id, key = %key, error = %e, "Failed to delete chunk");
                        false
                    }
                }
            }
        });

        let deleted = join_all(deletions).await.into_iter().filter(|ok| *ok).count();

        tracing::debug!(upload_id = %upload_id, deleted, backend = self.backend.name(), "Deleted session chunks");
        deleted
    }
}
