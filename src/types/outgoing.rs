use serde::{Deserialize, Serialize};
use specta::Type;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct OutgoingEvent {
    pub id: Uuid,
    pub endpoint_url: String,
    pub event_type: String,
    pub payload: String,

    pub status: OutgoingStatus,
    pub attempts: i64,

    pub created_at: String,
    pub next_attempt_at: Option<String>,

    pub lease_expires_at: Option<String>,
    pub leased_by: Option<String>,

    pub last_status_code: Option<i64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingStatus {
    Pending,
    InFlight,
    Delivered,
    Dead,
}

impl OutgoingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Delivered => "delivered",
            Self::Dead => "dead",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "delivered" => Some(Self::Delivered),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct EnqueueOutgoingRequest {
    pub endpoint_url: String,
    pub event_type: String,
    pub payload: String,
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct EnqueueOutgoingResponse {
    pub event: OutgoingEvent,
}
