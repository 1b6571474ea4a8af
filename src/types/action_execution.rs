use serde::{Deserialize, Serialize};
use specta::Type;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct ActionExecution {
    pub id: Uuid,
    pub event_id: Uuid,
    pub action_id: String,

    pub status: ExecutionStatus,
    pub attempt_count: i64,
    pub last_attempt_at: Option<String>,
    pub error_message: Option<String>,

    pub locked_at: Option<String>,
    pub locked_by: Option<String>,
    /// Incremented on every state transition. Writes carry the version they
    /// were computed from and are rejected if it moved.
    pub lock_version: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
