//! Local filesystem blob store

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::{BlobStore, StorageError, StorageResult};

/// Stores each key as a file under a base directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        tokio::fs::create_dir_all(&base_path).await?;

        tracing::info!(path = %base_path.display(), "Using local blob storage");

        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a key to a path, refusing anything that could escape the base
    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.base_path.join(relative))
    }

    async fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write to a sibling temp file and rename, so readers never see a partial object
    async fn commit(tmp: &Path, path: &Path) -> StorageResult<()> {
        if let Err(e) = tokio::fs::rename(tmp, path).await {
            let _ = tokio::fs::remove_file(tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        path.with_file_name(name)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        Self::ensure_parent(&path).await?;

        let tmp = Self::temp_path(&path);
        tokio::fs::write(&tmp, &data).await?;
        Self::commit(&tmp, &path).await
    }

    async fn put_file(&self, key: &str, source: &Path, _content_type: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        Self::ensure_parent(&path).await?;

        // copy rather than rename: the source may live on another filesystem
        let tmp = Self::temp_path(&path);
        tokio::fs::copy(source, &tmp).await?;
        Self::commit(&tmp, &path).await
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::ObjectNotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        // Best effort: drop the directory once it is empty
        if let Some(parent) = path.parent() {
            if parent != self.base_path {
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
