use serde::{Deserialize, Serialize};
use specta::Type;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct CircuitSnapshot {
    pub endpoint: String,
    pub status: CircuitStatus,
    pub failure_count: i64,
    pub last_failure_at: Option<String>,
    pub opened_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    #[default]
    Closed,
    HalfOpen,
    Open,
}
