//! Lightshow Ingest Library
//!
//! Resumable ingestion pipeline for lighting sequence files. The server
//! binary is in main.rs; this crate exposes the pipeline for tests and
//! benchmarks.
//!
//! # Modules
//!
//! - `upload`: validation, chunk storage, assembly and the session state machine
//! - `metadata`: FSEQ header and xLights XML extraction
//! - `storage`: blob backends (local filesystem, S3-compatible)
//! - `db`: SQLite pool and schema
//! - `routes`: axum handlers

pub mod config;
pub mod db;
pub mod error;
pub mod metadata;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the HTTP application
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_routes = routes::upload::router(&state.config().upload);

    Router::new()
        .nest("/health", routes::health::router())
        .nest("/api/v1/health", routes::health::router())
        .nest("/api/v1/uploads", upload_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
