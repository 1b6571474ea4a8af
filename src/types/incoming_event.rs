use serde::{Deserialize, Serialize};
use specta::Type;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct IncomingEvent {
    pub id: Uuid,
    pub provider: String,
    pub external_id: String,
    pub event_type: String,
    /// Raw request body exactly as received.
    pub payload: String,
    pub headers: BTreeMap<String, String>,

    pub dedup_state: DedupState,
    pub status: EventStatus,

    pub received_at: String,
    pub archived_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DedupState {
    Unique,
    Duplicate,
    Replayed,
}

impl DedupState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unique => "unique",
            Self::Duplicate => "duplicate",
            Self::Replayed => "replayed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unique" => Some(Self::Unique),
            "duplicate" => Some(Self::Duplicate),
            "replayed" => Some(Self::Replayed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Received,
    Processing,
    Processed,
    PartiallyProcessed,
    Failed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Processed => "processed",
            Self::PartiallyProcessed => "partially_processed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "received" => Some(Self::Received),
            "processing" => Some(Self::Processing),
            "processed" => Some(Self::Processed),
            "partially_processed" => Some(Self::PartiallyProcessed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
