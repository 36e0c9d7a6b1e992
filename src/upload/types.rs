//! Upload types for the chunked ingestion protocol

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::{FileMetadata, MetadataError};
use crate::storage::StorageError;

// ============================================================================
// Constants
// ============================================================================

const MB: u64 = 1024 * 1024;

/// Default chunk size: 5MB
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * MB;

/// Files at or below this size may use the one-shot path: 10MB
pub const DEFAULT_SIMPLE_UPLOAD_MAX: u64 = 10 * MB;

/// Session expiry time: 24 hours
pub const SESSION_EXPIRY_HOURS: i64 = 24;

// ============================================================================
// File Types
// ============================================================================

/// Declared role of an uploaded file within a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    /// Rendered binary playback file (.fseq)
    Rendered,
    /// Editable XML project/sequence file
    Source,
    /// Supporting media (audio, images)
    Asset,
    /// Preview video or image
    Preview,
}

impl FileType {
    pub const ALL: [FileType; 4] = [Self::Rendered, Self::Source, Self::Asset, Self::Preview];

    /// Maximum accepted size in bytes
    pub fn max_size(&self) -> u64 {
        match self {
            Self::Rendered => 500 * MB,
            Self::Source => 100 * MB,
            Self::Asset => 50 * MB,
            Self::Preview => 200 * MB,
        }
    }

    /// Lowercase extensions accepted for this type
    pub fn allowed_extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Rendered => &["fseq"],
            Self::Source => &["xsq", "xml"],
            Self::Asset => &["mp3", "wav", "ogg", "m4a", "png", "jpg", "jpeg", "gif"],
            Self::Preview => &["mp4", "webm", "mov", "gif", "png", "jpg", "jpeg"],
        }
    }

    /// MIME types clients are expected to send for this type
    pub fn expected_mime_types(&self) -> &'static [&'static str] {
        match self {
            Self::Rendered => &["application/octet-stream"],
            Self::Source => &["application/xml", "text/xml", "application/octet-stream"],
            Self::Asset => &[
                "audio/mpeg",
                "audio/wav",
                "audio/x-wav",
                "audio/ogg",
                "audio/mp4",
                "audio/x-m4a",
                "image/png",
                "image/jpeg",
                "image/gif",
            ],
            Self::Preview => &[
                "video/mp4",
                "video/webm",
                "video/quicktime",
                "image/gif",
                "image/png",
                "image/jpeg",
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rendered => "RENDERED",
            Self::Source => "SOURCE",
            Self::Asset => "ASSET",
            Self::Preview => "PREVIEW",
        }
    }

    /// Path segment used when building storage keys
    pub fn key_segment(&self) -> &'static str {
        match self {
            Self::Rendered => "rendered",
            Self::Source => "source",
            Self::Asset => "asset",
            Self::Preview => "preview",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RENDERED" => Ok(Self::Rendered),
            "SOURCE" => Ok(Self::Source),
            "ASSET" => Ok(Self::Asset),
            "PREVIEW" => Ok(Self::Preview),
            other => Err(UploadError::InvalidFileType(other.to_string())),
        }
    }
}

// ============================================================================
// Session Status
// ============================================================================

/// Session status
///
/// Forward path: `Initiated -> Uploading -> AllChunksUploaded -> Processing -> Completed`.
/// `Aborted` and `Expired` can be entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Created, no chunk received yet
    Initiated,
    /// Receiving chunks
    Uploading,
    /// Every index received, waiting for completion
    AllChunksUploaded,
    /// Assembly / extraction in progress (or failed and awaiting retry)
    Processing,
    /// Asset stored, result cached on the session
    Completed,
    /// Cancelled by the client
    Aborted,
    /// TTL elapsed
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted | Self::Expired)
    }

    /// Whether chunks may still be written for this session
    pub fn accepts_chunks(&self) -> bool {
        matches!(self, Self::Initiated | Self::Uploading)
    }

    /// The transition table. Every status change goes through here.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Aborted) | (_, Expired) => true,
            (Initiated, Uploading) => true,
            (Uploading, AllChunksUploaded) => true,
            (AllChunksUploaded, Processing) => true,
            (Processing, Completed) => true,
            _ => false,
        }
    }

    /// Validate a transition against the table
    pub fn transition(self, next: SessionStatus) -> Result<SessionStatus, UploadError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(UploadError::InvalidTransition { from: self, to: next })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Uploading => "UPLOADING",
            Self::AllChunksUploaded => "ALL_CHUNKS_UPLOADED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Aborted => "ABORTED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(Self::Initiated),
            "UPLOADING" => Ok(Self::Uploading),
            "ALL_CHUNKS_UPLOADED" => Ok(Self::AllChunksUploaded),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "ABORTED" => Ok(Self::Aborted),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(UploadError::InternalError(format!("unknown session status: {other}"))),
        }
    }
}

// ============================================================================
// Initiate Types
// ============================================================================

/// Request to initiate a chunked upload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    /// Account that owns the session
    pub owner_id: String,

    /// Original file name
    pub file_name: String,

    /// Total file size in bytes
    pub file_size: u64,

    /// MIME type reported by the client
    pub mime_type: String,

    /// What the file is for
    pub declared_type: FileType,

    #[serde(default)]
    pub product_id: Option<String>,

    #[serde(default)]
    pub version_id: Option<String>,
}

/// Response to an initiate request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub upload_id: Uuid,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub expires_at: DateTime<Utc>,

    /// Non-fatal validation findings (e.g. MIME mismatch)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// Response after uploading a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub chunk_index: u32,
    pub progress: UploadProgress,
}

/// Progress snapshot for a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub chunks_received: u32,
    pub total_chunks: u32,
    pub percent: f64,
    pub status: SessionStatus,
}

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    pub upload_id: Uuid,
    pub file_name: String,
    pub file_type: FileType,
    pub status: SessionStatus,
    pub progress: UploadProgress,
    pub missing_chunks: Vec<u32>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CompletionResult>,
}

impl From<&UploadSession> for UploadStatusResponse {
    fn from(session: &UploadSession) -> Self {
        Self {
            upload_id: session.id,
            file_name: session.file_name.clone(),
            file_type: session.file_type,
            status: session.status,
            progress: session.progress(),
            missing_chunks: session.missing_chunks(),
            expires_at: session.expires_at,
            result: session.result.clone(),
        }
    }
}

// ============================================================================
// Completion Types
// ============================================================================

/// Descriptor returned by `complete` and by the one-shot path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    pub file_id: Uuid,
    pub storage_key: String,
    pub content_hash: String,
    pub size: u64,
    pub metadata: FileMetadata,
    pub deduplicated: bool,
}

impl CompletionResult {
    pub fn from_asset(asset: &FileAsset, deduplicated: bool) -> Self {
        Self {
            file_id: asset.id,
            storage_key: asset.storage_key.clone(),
            content_hash: asset.content_hash.clone(),
            size: asset.size,
            metadata: asset.metadata.clone(),
            deduplicated,
        }
    }
}

/// A one-shot upload that never creates a session
#[derive(Debug, Clone)]
pub struct SimpleUploadRequest {
    pub file_name: String,
    /// Client-reported MIME type; inferred from the file name when absent
    pub mime_type: Option<String>,
    pub declared_type: FileType,
    pub data: Vec<u8>,
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: Uuid,
    pub owner_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: FileType,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u32,

    /// Indices of chunks that have been received
    pub received_chunks: BTreeSet<u32>,

    pub status: SessionStatus,
    pub product_id: Option<String>,
    pub version_id: Option<String>,

    /// Cached descriptor, present once the session is `Completed`
    pub result: Option<CompletionResult>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a new upload session
    pub fn new(request: &InitiateRequest, chunk_size: u64, ttl: chrono::Duration) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            owner_id: request.owner_id.clone(),
            file_name: request.file_name.clone(),
            file_size: request.file_size,
            file_type: request.declared_type,
            mime_type: request.mime_type.clone(),
            chunk_size,
            total_chunks: total_chunks(request.file_size, chunk_size),
            received_chunks: BTreeSet::new(),
            status: SessionStatus::Initiated,
            product_id: request.product_id.clone(),
            version_id: request.version_id.clone(),
            result: None,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if session has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Check if all chunks have been received
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() as u32 == self.total_chunks
    }

    /// Get indices of chunks that still need to be uploaded
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    /// Byte length the chunk at `index` must have
    pub fn expected_chunk_len(&self, index: u32) -> u64 {
        expected_chunk_len(self.file_size, self.chunk_size, index)
    }

    pub fn progress(&self) -> UploadProgress {
        let received = self.received_chunks.len() as u32;
        let percent = if self.total_chunks == 0 {
            100.0
        } else {
            (received as f64 / self.total_chunks as f64) * 100.0
        };

        UploadProgress {
            chunks_received: received,
            total_chunks: self.total_chunks,
            percent,
            status: self.status,
        }
    }
}

/// `ceil(file_size / chunk_size)`
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u32 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size) as u32
}

/// Length of chunk `index`: `chunk_size` except for the final remainder
pub fn expected_chunk_len(file_size: u64, chunk_size: u64, index: u32) -> u64 {
    let start = index as u64 * chunk_size;
    file_size.saturating_sub(start).min(chunk_size)
}

// ============================================================================
// Asset Types
// ============================================================================

/// Durable, content-addressed result of an ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAsset {
    pub id: Uuid,
    pub content_hash: String,
    pub size: u64,
    pub storage_key: String,
    pub mime_type: String,
    pub file_type: FileType,
    pub metadata: FileMetadata,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Validation Types
// ============================================================================

/// Outcome of policy validation; errors and warnings are exhaustive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Validation failed: {}", errors.join("; "))]
    ValidationFailed { errors: Vec<String>, warnings: Vec<String> },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Session is {0} and no longer accepts chunks")]
    SessionClosed(SessionStatus),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    #[error("Chunk {index} checksum mismatch: expected {expected}, got {actual}")]
    ChunkChecksumMismatch { index: u32, expected: String, actual: String },

    #[error("Chunk {index} has {actual} bytes, expected {expected}")]
    ChunkSizeMismatch { index: u32, expected: u64, actual: u64 },

    #[error("Chunk index out of bounds: {index} (total: {total})")]
    ChunkIndexOutOfBounds { index: u32, total: u32 },

    #[error("Incomplete upload, missing chunks: {0:?}")]
    MissingChunks(Vec<u32>),

    #[error("Assembled size {actual} does not match declared size {expected}")]
    AssembledSizeMismatch { expected: u64, actual: u64 },

    #[error("File signature does not match declared type {0}: corrupted or spoofed file")]
    SignatureMismatch(FileType),

    #[error("File too large for one-shot upload: {size} bytes (max: {max}), use chunked upload")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid file type: {0}")]
    InvalidFileType(String),

    #[error("Metadata extraction failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExpired(_) => StatusCode::GONE,
            Self::SessionClosed(_) => StatusCode::CONFLICT,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::ChunkChecksumMismatch { .. } => StatusCode::CONFLICT,
            Self::ChunkSizeMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::ChunkIndexOutOfBounds { .. } => StatusCode::BAD_REQUEST,
            Self::MissingChunks(_) => StatusCode::CONFLICT,
            Self::AssembledSizeMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SignatureMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Metadata(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::StorageError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::SessionClosed(_) => "SESSION_CLOSED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ChunkChecksumMismatch { .. } => "CHUNK_CHECKSUM_MISMATCH",
            Self::ChunkSizeMismatch { .. } => "CHUNK_SIZE_MISMATCH",
            Self::ChunkIndexOutOfBounds { .. } => "CHUNK_INDEX_OUT_OF_BOUNDS",
            Self::MissingChunks(_) => "INCOMPLETE_UPLOAD",
            Self::AssembledSizeMismatch { .. } => "ASSEMBLED_SIZE_MISMATCH",
            Self::SignatureMismatch(_) => "SIGNATURE_MISMATCH",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::InvalidFileType(_) => "INVALID_FILE_TYPE",
            Self::Metadata(_) => "METADATA_INVALID",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the client may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChunkChecksumMismatch { .. }
                | Self::MissingChunks(_)
                | Self::StorageError(_)
                | Self::DatabaseError(_)
        )
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        UploadError::StorageError(err.to_string())
    }
}

impl From<sqlx::Error> for UploadError {
    fn from(err: sqlx::Error) -> Self {
        UploadError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        UploadError::InternalError(format!("serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_chunks_rounds_up() {
        assert_eq!(total_chunks(12_000_000, 5_000_000), 3);
        assert_eq!(total_chunks(10_000_000, 5_000_000), 2);
        assert_eq!(total_chunks(1, 5_000_000), 1);
        assert_eq!(total_chunks(0, 5_000_000), 0);
    }

    #[test]
    fn test_chunk_lengths_sum_to_file_size() {
        for (size, chunk) in [(12_000_000u64, 5_000_000u64), (1, 7), (7, 7), (8, 7), (1_048_577, 65_536)] {
            let count = total_chunks(size, chunk);
            let sum: u64 = (0..count).map(|i| expected_chunk_len(size, chunk, i)).sum();
            assert_eq!(sum, size, "size={size} chunk={chunk}");
        }
        assert_eq!(expected_chunk_len(12_000_000, 5_000_000, 2), 2_000_000);
    }

    #[test]
    fn test_forward_transitions() {
        use SessionStatus::*;
        assert!(Initiated.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(AllChunksUploaded));
        assert!(AllChunksUploaded.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        use SessionStatus::*;
        assert!(!Initiated.can_transition_to(Completed));
        assert!(!Initiated.can_transition_to(Processing));
        assert!(!Uploading.can_transition_to(Initiated));
        assert!(!Processing.can_transition_to(Uploading));
        assert!(matches!(
            Initiated.transition(Completed),
            Err(UploadError::InvalidTransition { from: Initiated, to: Completed })
        ));
    }

    #[test]
    fn test_failure_states_reachable_until_terminal() {
        use SessionStatus::*;
        for status in [Initiated, Uploading, AllChunksUploaded, Processing] {
            assert!(status.can_transition_to(Aborted));
            assert!(status.can_transition_to(Expired));
        }
        for status in [Completed, Aborted, Expired] {
            assert!(!status.can_transition_to(Aborted));
            assert!(!status.can_transition_to(Expired));
        }
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            SessionStatus::Initiated,
            SessionStatus::AllChunksUploaded,
            SessionStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_file_type_parse_is_case_insensitive() {
        assert_eq!("rendered".parse::<FileType>().unwrap(), FileType::Rendered);
        assert_eq!(" Preview ".parse::<FileType>().unwrap(), FileType::Preview);
        assert!("video".parse::<FileType>().is_err());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(UploadError::MissingChunks(vec![1]).is_retryable());
        assert!(UploadError::StorageError("down".into()).is_retryable());
        assert!(!UploadError::SignatureMismatch(FileType::Rendered).is_retryable());
    }
}
