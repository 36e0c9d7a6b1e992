//! Upload Session Store
//!
//! Persists upload sessions in SQLite with:
//! - Received chunks as rows keyed by (session, index), so recording a chunk
//!   is a set union that concurrent requests cannot undo
//! - Status changes as compare-and-set updates checked against the
//!   transition table
//! - Expiry queries for the cleanup sweep

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::types::{CompletionResult, SessionStatus, UploadError, UploadSession};
use crate::db::{parse_timestamp, timestamp};

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    owner_id: String,
    file_name: String,
    file_size: i64,
    file_type: String,
    mime_type: String,
    chunk_size: i64,
    total_chunks: i64,
    status: String,
    product_id: Option<String>,
    version_id: Option<String>,
    result: Option<String>,
    created_at: String,
    updated_at: String,
    expires_at: String,
}

impl SessionRow {
    fn into_session(self, received_chunks: BTreeSet<u32>) -> Result<UploadSession, UploadError> {
        let corrupt = |what: &str| UploadError::InternalError(format!("corrupt session row {}: {}", self.id, what));

        let result = match &self.result {
            Some(json) => Some(serde_json::from_str::<CompletionResult>(json)?),
            None => None,
        };

        Ok(UploadSession {
            id: Uuid::parse_str(&self.id).map_err(|_| corrupt("id"))?,
            owner_id: self.owner_id.clone(),
            file_name: self.file_name.clone(),
            file_size: u64::try_from(self.file_size).map_err(|_| corrupt("file_size"))?,
            file_type: self.file_type.parse()?,
            mime_type: self.mime_type.clone(),
            chunk_size: u64::try_from(self.chunk_size).map_err(|_| corrupt("chunk_size"))?,
            total_chunks: u32::try_from(self.total_chunks).map_err(|_| corrupt("total_chunks"))?,
            received_chunks,
            status: self.status.parse()?,
            product_id: self.product_id.clone(),
            version_id: self.version_id.clone(),
            result,
            created_at: parse_timestamp(&self.created_at).map_err(|_| corrupt("created_at"))?,
            updated_at: parse_timestamp(&self.updated_at).map_err(|_| corrupt("updated_at"))?,
            expires_at: parse_timestamp(&self.expires_at).map_err(|_| corrupt("expires_at"))?,
        })
    }
}

const SELECT_SESSION: &str = r#"
    SELECT id, owner_id, file_name, file_size, file_type, mime_type, chunk_size,
           total_chunks, status, product_id, version_id, result,
           created_at, updated_at, expires_at
    FROM upload_sessions
"#;

// ============================================================================
// Session Store
// ============================================================================

/// SQLite-backed store for upload sessions
#[derive(Clone)]
pub struct SessionStore {
    db: SqlitePool,
}

impl SessionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Persist a freshly created session
    pub async fn create(&self, session: &UploadSession) -> Result<(), UploadError> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                id, owner_id, file_name, file_size, file_type, mime_type, chunk_size,
                total_chunks, status, product_id, version_id, result,
                created_at, updated_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.owner_id)
        .bind(&session.file_name)
        .bind(session.file_size as i64)
        .bind(session.file_type.as_str())
        .bind(&session.mime_type)
        .bind(session.chunk_size as i64)
        .bind(session.total_chunks as i64)
        .bind(session.status.as_str())
        .bind(&session.product_id)
        .bind(&session.version_id)
        .bind(timestamp(session.created_at))
        .bind(timestamp(session.updated_at))
        .bind(timestamp(session.expires_at))
        .execute(&self.db)
        .await?;

        tracing::info!(
            upload_id = %session.id,
            owner_id = %session.owner_id,
            file_name = %session.file_name,
            file_size = session.file_size,
            total_chunks = session.total_chunks,
            "Created upload session"
        );

        Ok(())
    }

    /// Load a session and its received-chunk set
    pub async fn get(&self, id: Uuid) -> Result<Option<UploadSession>, UploadError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!("{SELECT_SESSION} WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.db)
            .await?;

        match row {
            Some(row) => {
                let received = self.received_chunks(id).await?;
                Ok(Some(row.into_session(received)?))
            }
            None => Ok(None),
        }
    }

    /// Load a session or fail with `SessionNotFound`
    pub async fn require(&self, id: Uuid) -> Result<UploadSession, UploadError> {
        self.get(id)
            .await?
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    /// Indices recorded for a session
    pub async fn received_chunks(&self, id: Uuid) -> Result<BTreeSet<u32>, UploadError> {
        let indices: Vec<i64> = sqlx::query_scalar(
            "SELECT chunk_index FROM upload_session_chunks WHERE upload_id = ? ORDER BY chunk_index",
        )
        .bind(id.to_string())
        .fetch_all(&self.db)
        .await?;

        Ok(indices.into_iter().filter_map(|i| u32::try_from(i).ok()).collect())
    }

    /// Checksum recorded for one received chunk
    pub async fn chunk_checksum(&self, id: Uuid, chunk_index: u32) -> Result<Option<String>, UploadError> {
        let checksum: Option<String> = sqlx::query_scalar(
            "SELECT checksum FROM upload_session_chunks WHERE upload_id = ? AND chunk_index = ?",
        )
        .bind(id.to_string())
        .bind(chunk_index as i64)
        .fetch_optional(&self.db)
        .await?;

        Ok(checksum)
    }

    /// Add a chunk index to the received set and return the new set size
    ///
    /// Re-recording an index replaces its checksum and keeps the set unchanged.
    pub async fn record_chunk(
        &self,
        id: Uuid,
        chunk_index: u32,
        size: u64,
        checksum: &str,
    ) -> Result<u32, UploadError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO upload_session_chunks (upload_id, chunk_index, size, checksum, received_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (upload_id, chunk_index)
            DO UPDATE SET size = excluded.size,
                          checksum = excluded.checksum,
                          received_at = excluded.received_at
            "#,
        )
        .bind(id.to_string())
        .bind(chunk_index as i64)
        .bind(size as i64)
        .bind(checksum)
        .bind(timestamp(Utc::now()))
        .execute(&self.db)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                return Err(UploadError::SessionNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM upload_session_chunks WHERE upload_id = ?")
            .bind(id.to_string())
            .fetch_one(&self.db)
            .await?;

        Ok(count as u32)
    }

    /// Move a session from `from` to `to`
    ///
    /// Returns `false` when the stored status was no longer `from`, meaning
    /// another request already moved it.
    pub async fn transition(&self, id: Uuid, from: SessionStatus, to: SessionStatus) -> Result<bool, UploadError> {
        from.transition(to)?;

        let result = sqlx::query("UPDATE upload_sessions SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(timestamp(Utc::now()))
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(&self.db)
            .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            tracing::debug!(upload_id = %id, from = %from, to = %to, "Session status changed");
        }

        Ok(applied)
    }

    /// Mark a processing session completed and cache its result
    pub async fn complete(&self, id: Uuid, result: &CompletionResult) -> Result<bool, UploadError> {
        SessionStatus::Processing.transition(SessionStatus::Completed)?;

        let json = serde_json::to_string(result)?;
        let updated = sqlx::query(
            "UPDATE upload_sessions SET status = ?, result = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(SessionStatus::Completed.as_str())
        .bind(json)
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .bind(SessionStatus::Processing.as_str())
        .execute(&self.db)
        .await?;

        Ok(updated.rows_affected() == 1)
    }

    /// Delete a session and its chunk rows. Returns whether it existed.
    pub async fn delete(&self, id: Uuid) -> Result<bool, UploadError> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM upload_session_chunks WHERE upload_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM upload_sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(deleted.rows_affected() == 1)
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Sessions whose expiry time is before `now`
    pub async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<UploadSession>, UploadError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "{SELECT_SESSION} WHERE expires_at < ? ORDER BY expires_at"
        ))
        .bind(timestamp(now))
        .fetch_all(&self.db)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            let id = Uuid::parse_str(&row.id)
                .map_err(|_| UploadError::InternalError(format!("corrupt session id {}", row.id)))?;
            let received = self.received_chunks(id).await?;
            sessions.push(row.into_session(received)?);
        }

        Ok(sessions)
    }

    /// Count sessions that have not reached a terminal state
    pub async fn active_session_count(&self) -> Result<u64, UploadError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM upload_sessions WHERE status NOT IN ('COMPLETED', 'ABORTED', 'EXPIRED')",
        )
        .fetch_one(&self.db)
        .await?;

        Ok(count as u64)
    }
}

// ============================================================================
// Tests
// ============================================================================
