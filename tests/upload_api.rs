//! End-to-end tests for the upload HTTP API.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use lightshow_ingest::build_router;
use lightshow_ingest::config::Config;
use lightshow_ingest::db::create_pool;
use lightshow_ingest::state::AppState;
use lightshow_ingest::storage::{BlobStore, LocalBlobStore};
use lightshow_ingest::upload::chunk_checksum;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const CHUNK_SIZE: usize = 1024;

struct TestServer {
    router: Router,
    blobs: Arc<dyn BlobStore>,
    _temp_dir: TempDir,
}

async fn test_server() -> TestServer {
    let temp_dir = TempDir::new().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(temp_dir.path().join("blobs")).await.unwrap());
    let db = create_pool("sqlite::memory:").await.unwrap();

    let mut config = Config::default();
    config.upload.chunk_size = CHUNK_SIZE as u64;
    config.upload.simple_upload_max_bytes = 8 * 1024;
    config.upload.staging_dir = temp_dir.path().join("staging");

    let state = AppState::new(config, blobs.clone(), db);
    TestServer {
        router: build_router(state),
        blobs,
        _temp_dir: temp_dir,
    }
}

/// A v2 FSEQ file of `size` bytes
fn fseq_file(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; 32];
    data[0..4].copy_from_slice(b"PSEQ");
    data[4..6].copy_from_slice(&32u16.to_le_bytes());
    data[7] = 2;
    data[8..10].copy_from_slice(&32u16.to_le_bytes());
    data[10..14].copy_from_slice(&64u32.to_le_bytes());
    data[14..18].copy_from_slice(&1200u32.to_le_bytes());
    data[18] = 25;
    data.resize(size, 0x11);
    data
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

async fn json_request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    send(router, builder.body(body).unwrap()).await
}

async fn put_chunk(router: &Router, upload_id: &str, index: usize, chunk: &[u8], hash: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/api/v1/uploads/{upload_id}/chunks/{index}"))
        .header("Content-Type", "application/octet-stream")
        .header("X-Chunk-Hash", hash)
        .body(Body::from(chunk.to_vec()))
        .unwrap();
    send(router, request).await
}

async fn initiate(router: &Router, file_name: &str, size: usize) -> (StatusCode, Value) {
    json_request(
        router,
        "POST",
        "/api/v1/uploads/initiate",
        Some(json!({
            "ownerId": "seller-42",
            "fileName": file_name,
            "fileSize": size,
            "mimeType": "application/octet-stream",
            "declaredType": "RENDERED",
            "productId": "prod-1"
        })),
    )
    .await
}

#[tokio::test]
async fn test_health() {
    let server = test_server().await;
    let (status, body) = json_request(&server.router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "local");
}

#[tokio::test]
async fn test_chunked_upload_flow() {
    let server = test_server().await;
    let data = fseq_file(2500);

    let (status, body) = initiate(&server.router, "Jingle Bells.fseq", data.len()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["totalChunks"], 3);
    assert_eq!(body["chunkSize"], CHUNK_SIZE);
    let upload_id = body["uploadId"].as_str().unwrap().to_string();

    for index in [2usize, 0, 1] {
        let chunk = &data[index * CHUNK_SIZE..((index + 1) * CHUNK_SIZE).min(data.len())];
        let (status, body) = put_chunk(&server.router, &upload_id, index, chunk, &chunk_checksum(chunk)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["chunkIndex"], index);
    }

    let (status, body) = json_request(&server.router, "GET", &format!("/api/v1/uploads/{upload_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ALL_CHUNKS_UPLOADED");
    assert_eq!(body["progress"]["chunksReceived"], 3);

    let (status, first) =
        json_request(&server.router, "POST", &format!("/api/v1/uploads/{upload_id}/complete"), None).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["deduplicated"], false);
    assert_eq!(first["metadata"]["kind"], "sequence");
    assert_eq!(first["metadata"]["frameCount"], 1200);
    assert_eq!(first["metadata"]["framesPerSecond"], 40);

    let storage_key = first["storageKey"].as_str().unwrap();
    assert!(storage_key.starts_with("assets/rendered/"));
    assert_eq!(server.blobs.get(storage_key).await.unwrap(), data);

    // completing again returns the cached result
    let (status, second) =
        json_request(&server.router, "POST", &format!("/api/v1/uploads/{upload_id}/complete"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_checksum_mismatch_is_retryable() {
    let server = test_server().await;
    let data = fseq_file(1500);

    let (_, body) = initiate(&server.router, "show.fseq", data.len()).await;
    let upload_id = body["uploadId"].as_str().unwrap().to_string();

    let (status, body) = put_chunk(&server.router, &upload_id, 0, &data[..CHUNK_SIZE], "deadbeef").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CHUNK_CHECKSUM_MISMATCH");
    assert_eq!(body["retryable"], true);

    let (status, body) = put_chunk(&server.router, &upload_id, 0, &data[..CHUNK_SIZE], "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_incomplete_upload_lists_missing_chunks() {
    let server = test_server().await;
    let data = fseq_file(2500);

    let (_, body) = initiate(&server.router, "show.fseq", data.len()).await;
    let upload_id = body["uploadId"].as_str().unwrap().to_string();

    let chunk = &data[CHUNK_SIZE..2 * CHUNK_SIZE];
    put_chunk(&server.router, &upload_id, 1, chunk, &chunk_checksum(chunk)).await;

    let (status, body) =
        json_request(&server.router, "POST", &format!("/api/v1/uploads/{upload_id}/complete"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INCOMPLETE_UPLOAD");
    assert_eq!(body["retryable"], true);
    assert_eq!(body["missingChunks"], json!([0, 2]));
}

#[tokio::test]
async fn test_initiate_reports_every_violation() {
    let server = test_server().await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/api/v1/uploads/initiate",
        Some(json!({
            "ownerId": "seller-42",
            "fileName": "../secret.exe",
            "fileSize": 0,
            "mimeType": "application/octet-stream",
            "declaredType": "RENDERED"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["retryable"], false);
    assert!(body["details"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn test_abort_then_not_found() {
    let server = test_server().await;
    let data = fseq_file(1500);

    let (_, body) = initiate(&server.router, "show.fseq", data.len()).await;
    let upload_id = body["uploadId"].as_str().unwrap().to_string();
    let chunk = &data[..CHUNK_SIZE];
    put_chunk(&server.router, &upload_id, 0, chunk, &chunk_checksum(chunk)).await;

    let uri = format!("/api/v1/uploads/{upload_id}");
    let (status, _) = json_request(&server.router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // abort is idempotent
    let (status, _) = json_request(&server.router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = json_request(&server.router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SESSION_NOT_FOUND");

    let (status, _) = put_chunk(&server.router, &upload_id, 1, &data[CHUNK_SIZE..], &chunk_checksum(&data[CHUNK_SIZE..])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn multipart_body(boundary: &str, file_name: &str, content_type: &str, data: &[u8], declared_type: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"declaredType\"\r\n\r\n");
    body.extend_from_slice(declared_type.as_bytes());
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

async fn simple_upload(router: &Router, file_name: &str, content_type: &str, data: &[u8], declared_type: &str) -> (StatusCode, Value) {
    let boundary = "lightshow-test-boundary";
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/uploads/simple")
        .header("Content-Type", format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(multipart_body(boundary, file_name, content_type, data, declared_type)))
        .unwrap();
    send(router, request).await
}

#[tokio::test]
async fn test_simple_upload_and_dedup() {
    let server = test_server().await;
    let data = fseq_file(3000);

    let (status, first) = simple_upload(&server.router, "tiny.fseq", "application/octet-stream", &data, "RENDERED").await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["deduplicated"], false);

    let (status, second) = simple_upload(&server.router, "copy.fseq", "application/octet-stream", &data, "RENDERED").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["deduplicated"], true);
    assert_eq!(second["fileId"], first["fileId"]);
}

#[tokio::test]
async fn test_simple_upload_rejects_spoofed_file() {
    let server = test_server().await;

    let (status, body) =
        simple_upload(&server.router, "fake.fseq", "application/octet-stream", b"ID3 not a sequence", "RENDERED").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "SIGNATURE_MISMATCH");
}

#[tokio::test]
async fn test_simple_upload_too_large() {
    let server = test_server().await;
    let data = fseq_file(8 * 1024 + 1);

    let (status, body) = simple_upload(&server.router, "big.fseq", "application/octet-stream", &data, "RENDERED").await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["code"], "FILE_TOO_LARGE");
}
