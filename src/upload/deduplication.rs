//! Deduplication Service
//!
//! Registry of content-addressed file assets. A finished upload whose
//! (content hash, size) pair is already registered under the same file type
//! reuses the existing asset instead of storing a second copy. Identical
//! bytes declared as another type are a separate asset, since they have not
//! passed that type's signature check.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{FileAsset, FileType, UploadError};
use crate::db::{parse_timestamp, timestamp};

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct AssetRow {
    id: String,
    content_hash: String,
    size: i64,
    storage_key: String,
    mime_type: String,
    file_type: String,
    metadata: String,
    created_at: String,
}

impl TryFrom<AssetRow> for FileAsset {
    type Error = UploadError;

    fn try_from(row: AssetRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| UploadError::InternalError(format!("corrupt asset row {}: {}", row.id, what));

        Ok(FileAsset {
            id: Uuid::parse_str(&row.id).map_err(|_| corrupt("id"))?,
            content_hash: row.content_hash.clone(),
            size: u64::try_from(row.size).map_err(|_| corrupt("size"))?,
            storage_key: row.storage_key.clone(),
            mime_type: row.mime_type.clone(),
            file_type: row.file_type.parse()?,
            metadata: serde_json::from_str(&row.metadata)?,
            created_at: parse_timestamp(&row.created_at).map_err(|_| corrupt("created_at"))?,
        })
    }
}

// ============================================================================
// Deduplication Service
// ============================================================================

type AssetKey = (String, u64, FileType);

/// Service for detecting duplicate files and registering new assets
#[derive(Clone)]
pub struct DeduplicationService {
    inner: Arc<DeduplicationServiceInner>,
}

struct DeduplicationServiceInner {
    /// Database pool for asset lookups
    db: SqlitePool,

    /// In-memory cache of (hash, size, type) -> asset
    cache: RwLock<HashMap<AssetKey, FileAsset>>,
}

impl DeduplicationService {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            inner: Arc::new(DeduplicationServiceInner {
                db,
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Find an existing asset with identical content
    pub async fn find(
        &self,
        content_hash: &str,
        size: u64,
        file_type: FileType,
    ) -> Result<Option<FileAsset>, UploadError> {
        let key = (content_hash.to_string(), size, file_type);

        {
            let cache = self.inner.cache.read().await;
            if let Some(asset) = cache.get(&key) {
                tracing::debug!(content_hash = %content_hash, file_id = %asset.id, "Asset found in cache");
                return Ok(Some(asset.clone()));
            }
        }

        let row = sqlx::query_as::<_, AssetRow>(
            r#"
            SELECT id, content_hash, size, storage_key, mime_type, file_type, metadata, created_at
            FROM file_assets
            WHERE content_hash = ? AND size = ? AND file_type = ?
            "#,
        )
        .bind(content_hash)
        .bind(size as i64)
        .bind(file_type.as_str())
        .fetch_optional(&self.inner.db)
        .await?;

        let asset = match row {
            Some(row) => FileAsset::try_from(row)?,
            None => return Ok(None),
        };

        self.inner.cache.write().await.insert(key, asset.clone());
        Ok(Some(asset))
    }

    /// Register an asset and return the stored record
    ///
    /// When another upload registered the same content first, that record is
    /// returned and `asset` is discarded.
    pub async fn register(&self, asset: FileAsset) -> Result<FileAsset, UploadError> {
        let metadata = serde_json::to_string(&asset.metadata)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO file_assets (id, content_hash, size, storage_key, mime_type, file_type, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (content_hash, size, file_type) DO NOTHING
            "#,
        )
        .bind(asset.id.to_string())
        .bind(&asset.content_hash)
        .bind(asset.size as i64)
        .bind(&asset.storage_key)
        .bind(&asset.mime_type)
        .bind(asset.file_type.as_str())
        .bind(metadata)
        .bind(timestamp(asset.created_at))
        .execute(&self.inner.db)
        .await?;

        if inserted.rows_affected() == 1 {
            tracing::info!(
                file_id = %asset.id,
                content_hash = %asset.content_hash,
                size = asset.size,
                storage_key = %asset.storage_key,
                "Registered file asset"
            );
            self.inner
                .cache
                .write()
                .await
                .insert((asset.content_hash.clone(), asset.size, asset.file_type), asset.clone());
            return Ok(asset);
        }

        tracing::debug!(content_hash = %asset.content_hash, "Asset registered concurrently, reusing");
        self.find(&asset.content_hash, asset.size, asset.file_type)
            .await?
            .ok_or_else(|| UploadError::InternalError("asset vanished after conflicting insert".to_string()))
    }

    /// Number of registered assets
    pub async fn asset_count(&self) -> Result<u64, UploadError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM file_assets")
            .fetch_one(&self.inner.db)
            .await?;
        Ok(count as u64)
    }

    /// Clear the asset cache
    pub async fn clear_cache(&self) {
        self.inner.cache.write().await.clear();
        tracing::debug!("Cleared deduplication cache");
    }
}

// ============================================================================
// Tests
// ============================================================================
