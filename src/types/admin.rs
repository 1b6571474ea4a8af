use serde::{Deserialize, Serialize};
use specta::Type;

use crate::types::{ActionExecution, IncomingEvent};

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct GetEventResponse {
    pub event: IncomingEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ListActionsResponse {
    pub actions: Vec<ActionExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ReplayEventResponse {
    pub event: IncomingEvent,
    pub actions: Vec<ActionExecution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Type)]
pub struct ArchiveEventResponse {
    pub event: IncomingEvent,
}
