use std::sync::Arc;

use sqlx::SqlitePool;

use crate::clock::Clock;
use crate::ingest::IngestService;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub ingest: Arc<IngestService>,
    pub clock: Arc<dyn Clock>,
    pub admin_api_token: Option<String>,
}
