//! Chunk Assembler
//!
//! Concatenates a session's chunks in index order into a staging file. The
//! content digest and the leading header bytes are computed on the way
//! through, so the assembled file is never read back into memory.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::chunk_store::ChunkStore;
use super::hashing::ContentHasher;
use super::types::UploadError;
use crate::metadata::sequence::HEADER_READ_LIMIT;

/// A fully assembled upload waiting to be promoted to an asset
#[derive(Debug)]
pub struct AssembledFile {
    pub path: PathBuf,
    pub size: u64,
    /// SHA-256 of the whole file, lowercase hex
    pub content_hash: String,
    /// Up to the first 1KB of the file
    pub header: Vec<u8>,
}

impl AssembledFile {
    /// Remove the staging file
    pub async fn discard(self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staging file");
            }
        }
    }
}

/// Streams chunks into staging files
#[derive(Clone)]
pub struct ChunkAssembler {
    chunks: ChunkStore,
    staging_dir: PathBuf,
}

impl ChunkAssembler {
    pub fn new(chunks: ChunkStore, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            chunks,
            staging_dir: staging_dir.into(),
        }
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Each attempt gets its own file, so overlapping completions of one
    /// session never write into each other's output.
    fn staging_path(&self, upload_id: Uuid) -> PathBuf {
        self.staging_dir
            .join(format!("{upload_id}.{}.part", Uuid::new_v4().simple()))
    }

    /// Assemble chunks `0..total_chunks` and check the result is `expected_size` bytes
    pub async fn assemble(
        &self,
        upload_id: Uuid,
        total_chunks: u32,
        expected_size: u64,
    ) -> Result<AssembledFile, UploadError> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| UploadError::StorageError(format!("staging directory unavailable: {e}")))?;

        let path = self.staging_path(upload_id);
        match self.write_chunks(upload_id, total_chunks, &path).await {
            Ok((content_hash, header, size)) => {
                let assembled = AssembledFile {
                    path,
                    size,
                    content_hash,
                    header,
                };

                if size != expected_size {
                    assembled.discard().await;
                    return Err(UploadError::AssembledSizeMismatch {
                        expected: expected_size,
                        actual: size,
                    });
                }

                tracing::info!(
                    upload_id = %upload_id,
                    size,
                    content_hash = %assembled.content_hash,
                    "Assembled upload"
                );
                Ok(assembled)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(e)
            }
        }
    }

    async fn write_chunks(
        &self,
        upload_id: Uuid,
        total_chunks: u32,
        path: &Path,
    ) -> Result<(String, Vec<u8>, u64), UploadError> {
        let io_err = |e: std::io::Error| UploadError::StorageError(format!("staging write failed: {e}"));

        let mut file = tokio::fs::File::create(path).await.map_err(io_err)?;
        let mut hasher = ContentHasher::new();
        let mut header = Vec::with_capacity(HEADER_READ_LIMIT);

        for index in 0..total_chunks {
            let data = self.chunks.get_chunk(upload_id, index).await?;

            if header.len() < HEADER_READ_LIMIT {
                let take = (HEADER_READ_LIMIT - header.len()).min(data.len());
                header.extend_from_slice(&data[..take]);
            }

            hasher.update(&data);
            file.write_all(&data).await.map_err(io_err)?;
        }

        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;

        let size = hasher.len();
        Ok((hasher.finalize(), header, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalBlobStore;
    use crate::upload::hashing::content_digest;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn create_assembler(temp_dir: &TempDir) -> (ChunkAssembler, ChunkStore) {
        let backend = LocalBlobStore::new(temp_dir.path().join("blobs")).await.unwrap();
        let chunks = ChunkStore::new(Arc::new(backend), "chunks");
        (ChunkAssembler::new(chunks.clone(), temp_dir.path().join("staging")), chunks)
    }

    #[tokio::test]
    async fn test_assembles_in_index_order() {
        let temp_dir = TempDir::new().unwrap();
        let (assembler, chunks) = create_assembler(&temp_dir).await;
        let id = Uuid::new_v4();

        // written out of order
        chunks.put_chunk(id, 2, b"ccc".to_vec()).await.unwrap();
        chunks.put_chunk(id, 0, b"aaaa".to_vec()).await.unwrap();
        chunks.put_chunk(id, 1, b"bbbb".to_vec()).await.unwrap();

        let assembled = assembler.assemble(id, 3, 11).await.unwrap();
        assert_eq!(assembled.size, 11);
        assert_eq!(assembled.header, b"aaaabbbbccc");
        assert_eq!(assembled.content_hash, content_digest(b"aaaabbbbccc"));
        assert_eq!(tokio::fs::read(&assembled.path).await.unwrap(), b"aaaabbbbccc");

        let path = assembled.path.clone();
        assembled.discard().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_header_capped_at_limit() {
        let temp_dir = TempDir::new().unwrap();
        let (assembler, chunks) = create_assembler(&temp_dir).await;
        let id = Uuid::new_v4();

        chunks.put_chunk(id, 0, vec![1u8; 700]).await.unwrap();
        chunks.put_chunk(id, 1, vec![2u8; 700]).await.unwrap();

        let assembled = assembler.assemble(id, 2, 1400).await.unwrap();
        assert_eq!(assembled.header.len(), HEADER_READ_LIMIT);
        assert_eq!(assembled.header[699], 1);
        assert_eq!(assembled.header[700], 2);
    }

    #[tokio::test]
    async fn test_size_mismatch_discards_staging() {
        let temp_dir = TempDir::new().unwrap();
        let (assembler, chunks) = create_assembler(&temp_dir).await;
        let id = Uuid::new_v4();
        chunks.put_chunk(id, 0, b"short".to_vec()).await.unwrap();

        let result = assembler.assemble(id, 1, 10).await;
        assert!(matches!(
            result,
            Err(UploadError::AssembledSizeMismatch { expected: 10, actual: 5 })
        ));
        let mut entries = tokio::fs::read_dir(assembler.staging_dir()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_chunk_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (assembler, chunks) = create_assembler(&temp_dir).await;
        let id = Uuid::new_v4();
        chunks.put_chunk(id, 0, b"data".to_vec()).await.unwrap();

        let result = assembler.assemble(id, 2, 8).await;
        assert!(matches!(result, Err(UploadError::MissingChunks(ref v)) if v == &vec![1]));
    }
}
