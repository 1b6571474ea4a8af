//! Incoming event storage and the dedup/idempotency engine.
//!
//! [`find_or_create`] is the only place that decides whether an event has been
//! seen before.

mod store;

pub use store::{
    NewEvent, archive_event, find_by_external_id, find_or_create, get_event, mark_replayed,
    recompute_status, set_status,
};

use crate::types::{EventStatus, ExecutionStatus};

/// Aggregate status of an event from its action records.
///
/// An event with no action records has nothing left to do and counts as
/// processed.
pub fn aggregate_status(statuses: &[ExecutionStatus]) -> EventStatus {
    let processed = statuses
        .iter()
        .filter(|status| **status == ExecutionStatus::Processed)
        .count();
    let failed = statuses
        .iter()
        .filter(|status| **status == ExecutionStatus::Failed)
        .count();

    if processed == statuses.len() {
        EventStatus::Processed
    } else if failed == statuses.len() {
        EventStatus::Failed
    } else if processed + failed == statuses.len() {
        EventStatus::PartiallyProcessed
    } else {
        EventStatus::Processing
    }
}
