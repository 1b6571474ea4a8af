pub mod action_execution;
pub mod admin;
pub mod api_error;
pub mod circuit;
pub mod incoming_event;
pub mod ingest;
pub mod outgoing;

#[allow(unused_imports)]
pub use action_execution::{ActionExecution, ExecutionStatus};
#[allow(unused_imports)]
pub use admin::{ArchiveEventResponse, GetEventResponse, ListActionsResponse, ReplayEventResponse};
#[allow(unused_imports)]
pub use api_error::{ApiErrorCode, ApiErrorResponse};
#[allow(unused_imports)]
pub use circuit::{CircuitSnapshot, CircuitStatus};
#[allow(unused_imports)]
pub use incoming_event::{DedupState, EventStatus, IncomingEvent};
#[allow(unused_imports)]
pub use ingest::{IngestResponse, IngestStatus};
#[allow(unused_imports)]
pub use outgoing::{EnqueueOutgoingRequest, EnqueueOutgoingResponse, OutgoingEvent, OutgoingStatus};
