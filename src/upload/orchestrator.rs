//! Upload Orchestrator
//!
//! Drives a session through its lifecycle:
//!
//! 1. `initiate` validates the declared file and creates the session
//! 2. `upload_chunk` verifies and stores chunks in any order
//! 3. `complete` assembles, deduplicates, validates and stores the asset
//! 4. `abort` and the expiry sweep delete chunks and the session record
//!
//! Small files skip sessions entirely through `upload_simple`.
//!
//! Every request works against the persisted session; status changes are
//! compare-and-set, so concurrent requests for one session need no lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::assembler::{AssembledFile, ChunkAssembler};
use super::chunk_store::ChunkStore;
use super::deduplication::DeduplicationService;
use super::hashing::{checksums_match, chunk_checksum, content_digest};
use super::session::SessionStore;
use super::types::{
    ChunkUploadResponse, CompletionResult, FileAsset, FileType, InitiateRequest, InitiateResponse, SessionStatus,
    SimpleUploadRequest, UploadError, UploadSession, UploadStatusResponse,
};
use super::validation::{extension, validate, validate_signature};
use crate::config::UploadConfig;
use crate::metadata::{self, FileMetadata};
use crate::storage::BlobStore;

/// Coordinates sessions, chunk storage, assembly and asset registration
#[derive(Clone)]
pub struct UploadOrchestrator {
    inner: Arc<UploadOrchestratorInner>,
}

struct UploadOrchestratorInner {
    config: UploadConfig,
    sessions: SessionStore,
    chunks: ChunkStore,
    assembler: ChunkAssembler,
    dedup: DeduplicationService,
    blobs: Arc<dyn BlobStore>,
}

impl UploadOrchestrator {
    pub fn new(db: SqlitePool, blobs: Arc<dyn BlobStore>, config: UploadConfig) -> Self {
        let chunks = ChunkStore::new(blobs.clone(), config.chunk_prefix.clone());
        let assembler = ChunkAssembler::new(chunks.clone(), config.staging_dir.clone());

        Self {
            inner: Arc::new(UploadOrchestratorInner {
                sessions: SessionStore::new(db.clone()),
                dedup: DeduplicationService::new(db),
                chunks,
                assembler,
                blobs,
                config,
            }),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.inner.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.inner.sessions
    }

    pub fn dedup(&self) -> &DeduplicationService {
        &self.inner.dedup
    }

    // ========================================================================
    // Initiate
    // ========================================================================

    /// Validate a declared upload and open a session for it
    pub async fn initiate(&self, request: InitiateRequest) -> Result<InitiateResponse, UploadError> {
        let report = validate(
            &request.file_name,
            request.file_size,
            &request.mime_type,
            request.declared_type,
        );

        if !report.valid {
            tracing::info!(
                owner_id = %request.owner_id,
                file_name = %request.file_name,
                errors = ?report.errors,
                "Rejected upload at initiate"
            );
            return Err(UploadError::ValidationFailed {
                errors: report.errors,
                warnings: report.warnings,
            });
        }

        for warning in &report.warnings {
            tracing::warn!(file_name = %request.file_name, warning = %warning, "Upload validation warning");
        }

        let ttl = chrono::Duration::hours(self.inner.config.session_ttl_hours);
        let session = UploadSession::new(&request, self.inner.config.chunk_size, ttl);
        self.inner.sessions.create(&session).await?;

        Ok(InitiateResponse {
            upload_id: session.id,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            expires_at: session.expires_at,
            warnings: report.warnings,
        })
    }

    // ========================================================================
    // Chunk Upload
    // ========================================================================

    /// Verify and store one chunk
    ///
    /// `provided_hash` is the client's MD5 of the chunk. Re-sending an index
    /// replaces the stored copy and leaves the received set unchanged. Once
    /// every chunk has arrived, a re-sent index whose checksum matches the
    /// recorded one is acknowledged without being stored again.
    pub async fn upload_chunk(
        &self,
        upload_id: Uuid,
        chunk_index: u32,
        data: Vec<u8>,
        provided_hash: &str,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let session = self.load_live_session(upload_id).await?;

        if chunk_index >= session.total_chunks {
            return Err(UploadError::ChunkIndexOutOfBounds {
                index: chunk_index,
                total: session.total_chunks,
            });
        }

        let expected_len = session.expected_chunk_len(chunk_index);
        if data.len() as u64 != expected_len {
            return Err(UploadError::ChunkSizeMismatch {
                index: chunk_index,
                expected: expected_len,
                actual: data.len() as u64,
            });
        }

        let actual_hash = chunk_checksum(&data);
        if !checksums_match(&actual_hash, provided_hash) {
            tracing::warn!(
                upload_id = %upload_id,
                chunk_index,
                expected = %provided_hash,
                actual = %actual_hash,
                "Chunk checksum mismatch"
            );
            return Err(UploadError::ChunkChecksumMismatch {
                index: chunk_index,
                expected: provided_hash.trim().to_string(),
                actual: actual_hash,
            });
        }

        if !session.status.accepts_chunks() {
            return self.acknowledge_resent_chunk(&session, chunk_index, &actual_hash).await;
        }

        let received = self.store_chunk(&session, chunk_index, data, &actual_hash).await?;

        if received == session.total_chunks {
            let advanced = self
                .inner
                .sessions
                .transition(upload_id, SessionStatus::Uploading, SessionStatus::AllChunksUploaded)
                .await?;
            if advanced {
                tracing::info!(upload_id = %upload_id, total_chunks = session.total_chunks, "All chunks received");
            }
        }

        let current = self.inner.sessions.require(upload_id).await?;
        tracing::debug!(
            upload_id = %upload_id,
            chunk_index,
            received,
            total_chunks = session.total_chunks,
            "Chunk accepted"
        );

        Ok(ChunkUploadResponse {
            success: true,
            chunk_index,
            progress: current.progress(),
        })
    }

    /// Write a verified chunk and add it to the received set
    ///
    /// Returns the received set size. When the session disappears between
    /// the write and the record, the written chunk is removed again.
    async fn store_chunk(
        &self,
        session: &UploadSession,
        chunk_index: u32,
        data: Vec<u8>,
        checksum: &str,
    ) -> Result<u32, UploadError> {
        let size = data.len() as u64;
        self.inner.chunks.put_chunk(session.id, chunk_index, data).await?;

        if session.status == SessionStatus::Initiated {
            // losing this race means another chunk already moved the session
            self.inner
                .sessions
                .transition(session.id, SessionStatus::Initiated, SessionStatus::Uploading)
                .await?;
        }

        match self
            .inner
            .sessions
            .record_chunk(session.id, chunk_index, size, checksum)
            .await
        {
            Ok(received) => Ok(received),
            Err(e @ UploadError::SessionNotFound(_)) => {
                // aborted or swept while the chunk was being written
                self.inner.chunks.delete_chunks(session.id, [chunk_index]).await;
                tracing::debug!(upload_id = %session.id, chunk_index, "Removed chunk of vanished session");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Answer a chunk sent to a session that no longer takes new chunks
    ///
    /// Succeeds without storing anything when the index was already recorded
    /// with the same checksum.
    async fn acknowledge_resent_chunk(
        &self,
        session: &UploadSession,
        chunk_index: u32,
        checksum: &str,
    ) -> Result<ChunkUploadResponse, UploadError> {
        let resendable = matches!(
            session.status,
            SessionStatus::AllChunksUploaded | SessionStatus::Processing | SessionStatus::Completed
        );
        if resendable {
            let recorded = self.inner.sessions.chunk_checksum(session.id, chunk_index).await?;
            if recorded.is_some_and(|recorded| checksums_match(&recorded, checksum)) {
                tracing::debug!(
                    upload_id = %session.id,
                    chunk_index,
                    status = %session.status,
                    "Acknowledged re-sent chunk"
                );
                return Ok(ChunkUploadResponse {
                    success: true,
                    chunk_index,
                    progress: session.progress(),
                });
            }
        }

        Err(UploadError::SessionClosed(session.status))
    }

    // ========================================================================
    // Complete
    // ========================================================================

    /// Assemble a fully uploaded session into an asset
    ///
    /// A `Completed` session returns its cached result without touching
    /// chunks. A session left in `Processing` by an earlier failure is
    /// processed again.
    pub async fn complete(&self, upload_id: Uuid) -> Result<CompletionResult, UploadError> {
        let session = self.inner.sessions.require(upload_id).await?;

        if session.status == SessionStatus::Completed {
            return cached_result(&session);
        }
        let mut session = self.check_expiry(session).await?;

        let status = session.status;
        match status {
            SessionStatus::Initiated | SessionStatus::Uploading => {
                let missing = session.missing_chunks();
                if !missing.is_empty() {
                    return Err(UploadError::MissingChunks(missing));
                }
                // every index arrived but the final transition did not land
                self.inner
                    .sessions
                    .transition(upload_id, SessionStatus::Uploading, SessionStatus::AllChunksUploaded)
                    .await?;
                session = self.inner.sessions.require(upload_id).await?;
                if session.status != SessionStatus::AllChunksUploaded {
                    return Err(UploadError::InvalidTransition {
                        from: session.status,
                        to: SessionStatus::Processing,
                    });
                }
                self.begin_processing(&session).await?;
            }
            SessionStatus::AllChunksUploaded => {
                let missing = session.missing_chunks();
                if !missing.is_empty() {
                    return Err(UploadError::MissingChunks(missing));
                }
                if !self.begin_processing(&session).await? {
                    let current = self.inner.sessions.require(upload_id).await?;
                    match current.status {
                        SessionStatus::Completed => return cached_result(&current),
                        SessionStatus::Processing => {}
                        other => {
                            return Err(UploadError::InvalidTransition {
                                from: other,
                                to: SessionStatus::Processing,
                            })
                        }
                    }
                }
            }
            SessionStatus::Processing => {
                tracing::info!(upload_id = %upload_id, "Retrying completion of processing session");
            }
            status => return Err(UploadError::SessionClosed(status)),
        }

        let result = self.process(&session).await?;

        if !self.inner.sessions.complete(upload_id, &result).await? {
            // a concurrent completion finished first; its result is authoritative
            let current = self.inner.sessions.require(upload_id).await?;
            return match current.status {
                SessionStatus::Completed => cached_result(&current),
                other => Err(UploadError::InvalidTransition {
                    from: other,
                    to: SessionStatus::Completed,
                }),
            };
        }

        let deleted = self
            .inner
            .chunks
            .delete_chunks(upload_id, 0..session.total_chunks)
            .await;

        tracing::info!(
            upload_id = %upload_id,
            file_id = %result.file_id,
            storage_key = %result.storage_key,
            deduplicated = result.deduplicated,
            chunks_deleted = deleted,
            "Upload completed"
        );

        Ok(result)
    }

    async fn begin_processing(&self, session: &UploadSession) -> Result<bool, UploadError> {
        self.inner
            .sessions
            .transition(session.id, SessionStatus::AllChunksUploaded, SessionStatus::Processing)
            .await
    }

    /// Assemble, deduplicate, validate, store and register
    async fn process(&self, session: &UploadSession) -> Result<CompletionResult, UploadError> {
        let assembled = self
            .inner
            .assembler
            .assemble(session.id, session.total_chunks, session.file_size)
            .await?;

        let outcome = self.promote(session, &assembled).await;
        assembled.discard().await;
        outcome
    }

    async fn promote(&self, session: &UploadSession, assembled: &AssembledFile) -> Result<CompletionResult, UploadError> {
        if let Some(existing) = self
            .inner
            .dedup
            .find(&assembled.content_hash, assembled.size, session.file_type)
            .await? {
            tracing::info!(
                upload_id = %session.id,
                file_id = %existing.id,
                content_hash = %assembled.content_hash,
                "Duplicate content, reusing existing asset"
            );
            return Ok(CompletionResult::from_asset(&existing, true));
        }

        if !validate_signature(&assembled.header, session.file_type) {
            tracing::warn!(
                upload_id = %session.id,
                file_type = %session.file_type,
                "Assembled file signature does not match declared type"
            );
            return Err(UploadError::SignatureMismatch(session.file_type));
        }

        let storage_key = self.asset_key(&assembled.content_hash, session.file_type, &session.file_name);
        self.inner
            .blobs
            .put_file(&storage_key, &assembled.path, &session.mime_type)
            .await?;

        let metadata = metadata::extract_from_path(session.file_type, &assembled.path).await?;

        self.register_asset(
            &assembled.content_hash,
            assembled.size,
            storage_key,
            &session.mime_type,
            session.file_type,
            metadata,
        )
        .await
    }

    async fn register_asset(
        &self,
        content_hash: &str,
        size: u64,
        storage_key: String,
        mime_type: &str,
        file_type: FileType,
        metadata: FileMetadata,
    ) -> Result<CompletionResult, UploadError> {
        let candidate = FileAsset {
            id: Uuid::new_v4(),
            content_hash: content_hash.to_string(),
            size,
            storage_key,
            mime_type: mime_type.to_string(),
            file_type,
            metadata,
            created_at: Utc::now(),
        };
        let candidate_id = candidate.id;

        let stored = self.inner.dedup.register(candidate).await?;
        Ok(CompletionResult::from_asset(&stored, stored.id != candidate_id))
    }

    /// Content-derived key: `{prefix}/{type}/{hash[..2]}/{hash}.{ext}`
    pub fn asset_key(&self, content_hash: &str, file_type: FileType, file_name: &str) -> String {
        let ext = extension(file_name).unwrap_or_else(|| "bin".to_string());
        let shard = content_hash.get(..2).unwrap_or(content_hash);
        format!(
            "{}/{}/{}/{}.{}",
            self.inner.config.asset_prefix.trim_end_matches('/'),
            file_type.key_segment(),
            shard,
            content_hash,
            ext
        )
    }

    // ========================================================================
    // Abort & Cleanup
    // ========================================================================

    /// Delete a session's chunks and record, whatever its state
    ///
    /// Returns the number of chunks deleted, or `None` when the session was
    /// already gone.
    pub async fn abort(&self, upload_id: Uuid) -> Result<Option<usize>, UploadError> {
        match self.inner.sessions.get(upload_id).await? {
            Some(session) => {
                let deleted = self.discard_session(&session).await?;
                tracing::info!(upload_id = %upload_id, chunks_deleted = deleted, "Upload aborted");
                Ok(Some(deleted))
            }
            None => Ok(None),
        }
    }

    async fn discard_session(&self, session: &UploadSession) -> Result<usize, UploadError> {
        let deleted = self
            .inner
            .chunks
            .delete_chunks(session.id, session.received_chunks.iter().copied())
            .await;
        self.inner.sessions.delete(session.id).await?;
        Ok(deleted)
    }

    /// Abort every session whose expiry time has passed
    pub async fn cleanup_expired_sessions(&self) -> Result<usize, UploadError> {
        let expired = self.inner.sessions.find_expired(Utc::now()).await?;
        let mut removed = 0;

        for session in &expired {
            match self.discard_session(session).await {
                Ok(chunks_deleted) => {
                    removed += 1;
                    tracing::debug!(
                        upload_id = %session.id,
                        status = %session.status,
                        chunks_deleted,
                        "Removed expired session"
                    );
                }
                Err(e) => {
                    tracing::warn!(upload_id = %session.id, error = %e, "Failed to remove expired session");
                }
            }
        }

        if removed > 0 {
            tracing::info!(count = removed, "Cleaned up expired upload sessions");
        }

        Ok(removed)
    }

    /// Run the expiry sweep every `interval`
    pub fn start_cleanup_task(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                if let Err(e) = self.cleanup_expired_sessions().await {
                    tracing::warn!(error = %e, "Expired session sweep failed");
                }
            }
        })
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn status(&self, upload_id: Uuid) -> Result<UploadStatusResponse, UploadError> {
        let session = self.inner.sessions.require(upload_id).await?;
        Ok(UploadStatusResponse::from(&session))
    }

    // ========================================================================
    // Simple Upload
    // ========================================================================

    /// Ingest a small file in one request, without a session
    pub async fn upload_simple(&self, request: SimpleUploadRequest) -> Result<CompletionResult, UploadError> {
        let size = request.data.len() as u64;
        let max = self.inner.config.simple_upload_max_bytes;
        if size > max {
            return Err(UploadError::FileTooLarge { size, max });
        }

        let mime_type = request
            .mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                mime_guess::from_path(&request.file_name)
                    .first_or_octet_stream()
                    .to_string()
            });

        let report = validate(&request.file_name, size, &mime_type, request.declared_type);
        if !report.valid {
            return Err(UploadError::ValidationFailed {
                errors: report.errors,
                warnings: report.warnings,
            });
        }

        let content_hash = content_digest(&request.data);
        if let Some(existing) = self
            .inner
            .dedup
            .find(&content_hash, size, request.declared_type)
            .await? {
            tracing::info!(
                file_name = %request.file_name,
                file_id = %existing.id,
                "Duplicate content, reusing existing asset"
            );
            return Ok(CompletionResult::from_asset(&existing, true));
        }

        if !validate_signature(&request.data, request.declared_type) {
            return Err(UploadError::SignatureMismatch(request.declared_type));
        }

        let metadata = metadata::extract_from_bytes(request.declared_type, &request.data)?;

        let storage_key = self.asset_key(&content_hash, request.declared_type, &request.file_name);
        self.inner.blobs.put(&storage_key, request.data, &mime_type).await?;

        let result = self
            .register_asset(&content_hash, size, storage_key, &mime_type, request.declared_type, metadata)
            .await?;

        tracing::info!(
            file_name = %request.file_name,
            file_id = %result.file_id,
            storage_key = %result.storage_key,
            size,
            "Simple upload stored"
        );

        Ok(result)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Load a session, moving it to `Expired` when its TTL has passed
    async fn load_live_session(&self, upload_id: Uuid) -> Result<UploadSession, UploadError> {
        let session = self.inner.sessions.require(upload_id).await?;
        self.check_expiry(session).await
    }

    async fn check_expiry(&self, session: UploadSession) -> Result<UploadSession, UploadError> {
        if session.status == SessionStatus::Expired {
            return Err(UploadError::SessionExpired(session.id.to_string()));
        }
        if session.is_expired() && !session.status.is_terminal() {
            self.inner
                .sessions
                .transition(session.id, session.status, SessionStatus::Expired)
                .await?;
            tracing::info!(upload_id = %session.id, "Upload session expired");
            return Err(UploadError::SessionExpired(session.id.to_string()));
        }
        Ok(session)
    }
}

fn cached_result(session: &UploadSession) -> Result<CompletionResult, UploadError> {
    session
        .result
        .clone()
        .ok_or_else(|| UploadError::InternalError(format!("completed session {} has no result", session.id)))
}

// ============================================================================
// Tests
// ============================================================================
