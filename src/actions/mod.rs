//! Action declarations and their resolution for a `(provider, event_type)`.

mod lookup;
mod registry;
mod store;

pub use lookup::ActionLookup;
pub use registry::{ActionConfig, ActionPolicy, ActionRegistry, FALLBACK_RETRY_DELAY_SECS};
pub use store::{
    StoredActions, SyncSummary, lookup_stored, mark_removed, restore, sync_registry, upsert_config,
};
