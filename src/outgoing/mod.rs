//! Outbound delivery: a leased SQLite queue drained through the circuit
//! breaker.

mod config;
mod delivery;
mod forward;
mod store;

pub use config::OutgoingConfig;
pub use delivery::{
    BatchSummary, Deliverer, DeliveryError, DeliveryRequest, EVENT_ID_HEADER, EVENT_TYPE_HEADER,
    HttpDeliverer, OutgoingDispatcher, SIGNATURE_HEADER, sign_payload, spawn_outgoing_loop,
};
pub use forward::{ForwardTarget, ForwardingExecutor};
pub use store::{
    DeliveryReport, LeasedOutgoing, NewOutgoing, ReportOutcome, defer_outgoing, enqueue,
    get_outgoing, lease_outgoing, report_outgoing,
};
