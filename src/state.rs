//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::storage::BlobStore;
use crate::upload::UploadOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    blobs: Arc<dyn BlobStore>,
    db: SqlitePool,
    uploads: UploadOrchestrator,
}

impl AppState {
    pub fn new(config: Config, blobs: Arc<dyn BlobStore>, db: SqlitePool) -> Self {
        let uploads = UploadOrchestrator::new(db.clone(), blobs.clone(), config.upload.clone());

        Self {
            inner: Arc::new(AppStateInner {
                config,
                blobs,
                db,
                uploads,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the blob store backing chunks and assets
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.inner.blobs
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the upload pipeline
    pub fn uploads(&self) -> &UploadOrchestrator {
        &self.inner.uploads
    }
}
