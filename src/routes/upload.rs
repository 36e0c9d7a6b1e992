//! Upload Routes
//!
//! HTTP endpoints for the resumable ingestion protocol.
//!
//! Endpoints:
//! - POST /api/v1/uploads/initiate - Validate and open a session
//! - PUT /api/v1/uploads/:upload_id/chunks/:index - Upload a chunk (raw body, `X-Chunk-Hash`)
//! - POST /api/v1/uploads/:upload_id/complete - Assemble and store the file
//! - GET /api/v1/uploads/:upload_id - Get session status
//! - DELETE /api/v1/uploads/:upload_id - Abort the upload
//! - POST /api/v1/uploads/simple - One-shot multipart upload for small files

use axum::body::Bytes;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::state::AppState;
use crate::upload::{
    ChunkUploadResponse, CompletionResult, FileType, InitiateRequest, InitiateResponse, SimpleUploadRequest,
    UploadError, UploadStatusResponse,
};

/// Header carrying the client's MD5 of a chunk
pub const CHUNK_HASH_HEADER: &str = "X-Chunk-Hash";

/// Headroom over the largest payload for multipart framing
const BODY_LIMIT_SLACK: usize = 64 * 1024;

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: String,
    code: &'static str,
    retryable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_chunks: Option<Vec<u32>>,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Upload request failed");
        }

        let (details, warnings, missing_chunks) = match &self {
            UploadError::ValidationFailed { errors, warnings } => (errors.clone(), warnings.clone(), None),
            UploadError::MissingChunks(missing) => (Vec::new(), Vec::new(), Some(missing.clone())),
            _ => (Vec::new(), Vec::new(), None),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
            retryable: self.is_retryable(),
            details,
            warnings,
            missing_chunks,
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
///
/// The body limit admits one full chunk or one maximal simple upload.
pub fn router(config: &UploadConfig) -> Router<AppState> {
    let largest = config.chunk_size.max(config.simple_upload_max_bytes);
    let body_limit = usize::try_from(largest).unwrap_or(usize::MAX).saturating_add(BODY_LIMIT_SLACK);

    Router::new()
        .route("/initiate", post(initiate))
        .route("/simple", post(upload_simple))
        .route("/:upload_id/chunks/:index", put(upload_chunk))
        .route("/:upload_id/complete", post(complete))
        .route("/:upload_id", get(get_status).delete(abort))
        .layer(DefaultBodyLimit::max(body_limit))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/uploads/initiate
async fn initiate(
    State(state): State<AppState>,
    Json(request): Json<InitiateRequest>,
) -> Result<(StatusCode, Json<InitiateResponse>), UploadError> {
    let response = state.uploads().initiate(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /api/v1/uploads/:upload_id/chunks/:index
///
/// The chunk data is the raw request body.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk_index)): Path<(String, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, UploadError> {
    let upload_id = parse_upload_id(&upload_id)?;

    let provided_hash = headers
        .get(CHUNK_HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| UploadError::ValidationFailed {
            errors: vec![format!("missing {CHUNK_HASH_HEADER} header")],
            warnings: Vec::new(),
        })?
        .to_string();

    let response = state
        .uploads()
        .upload_chunk(upload_id, chunk_index, body.to_vec(), &provided_hash)
        .await?;

    Ok(Json(response))
}

/// POST /api/v1/uploads/:upload_id/complete
async fn complete(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<CompletionResult>, UploadError> {
    let upload_id = parse_upload_id(&upload_id)?;
    let result = state.uploads().complete(upload_id).await?;
    Ok(Json(result))
}

/// GET /api/v1/uploads/:upload_id
async fn get_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Result<Json<UploadStatusResponse>, UploadError> {
    let upload_id = parse_upload_id(&upload_id)?;
    Ok(Json(state.uploads().status(upload_id).await?))
}

/// DELETE /api/v1/uploads/:upload_id
///
/// Succeeds whether or not the session still exists.
async fn abort(State(state): State<AppState>, Path(upload_id): Path<String>) -> Result<StatusCode, UploadError> {
    // an id that never parsed was never a session
    let Ok(upload_id) = Uuid::parse_str(&upload_id) else {
        return Ok(StatusCode::NO_CONTENT);
    };

    state.uploads().abort(upload_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/uploads/simple
///
/// Multipart fields: `file` (the payload) and `declaredType`.
async fn upload_simple(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CompletionResult>), UploadError> {
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;
    let mut declared_type: Option<FileType> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to read multipart field");
        bad_request(format!("malformed multipart body: {e}"))
    })? {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| bad_request("file field has no file name".to_string()))?;
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file field: {e}")))?;
                file = Some((file_name, content_type, data.to_vec()));
            }
            "declaredType" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("failed to read declaredType: {e}")))?;
                declared_type = Some(text.parse()?);
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown multipart field");
            }
        }
    }

    let (file_name, mime_type, data) = file.ok_or_else(|| bad_request("missing file field".to_string()))?;
    let declared_type = declared_type.ok_or_else(|| bad_request("missing declaredType field".to_string()))?;

    let result = state
        .uploads()
        .upload_simple(SimpleUploadRequest {
            file_name,
            mime_type,
            declared_type,
            data,
        })
        .await?;

    let status = if result.deduplicated { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(result)))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_upload_id(raw: &str) -> Result<Uuid, UploadError> {
    Uuid::parse_str(raw).map_err(|_| UploadError::SessionNotFound(raw.to_string()))
}

fn bad_request(message: String) -> UploadError {
    UploadError::ValidationFailed {
        errors: vec![message],
        warnings: Vec::new(),
    }
}
