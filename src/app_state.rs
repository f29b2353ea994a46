use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::services::convert::Converter;
use crate::services::pipeline::JobOrchestrator;
use crate::services::storage::BlobStore;

/// Shared application state passed to all route handlers. Every client is
/// constructed once at process start and injected here.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub storage: Arc<BlobStore>,
    pub converter: Arc<dyn Converter>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub jwt_secret: Arc<String>,
    pub scratch_dir: PathBuf,
}

impl AppState {
    pub fn new(
        db: PgPool,
        storage: Arc<BlobStore>,
        converter: Arc<dyn Converter>,
        orchestrator: Arc<JobOrchestrator>,
        jwt_secret: String,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            storage,
            converter,
            orchestrator,
            jwt_secret: Arc::new(jwt_secret),
            scratch_dir,
        }
    }
}
