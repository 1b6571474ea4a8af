use serde::{Deserialize, Serialize};
use specta::Type;
use uuid::Uuid;

use super::DedupState;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct IngestResponse {
    pub status: IngestStatus,
    pub event_id: Option<Uuid>,
    pub dedup_state: Option<DedupState>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Accepted,
    Duplicate,
    Rejected,
}
