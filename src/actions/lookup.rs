use std::sync::Arc;

use sqlx::SqlitePool;

use crate::db::StoreError;

use super::registry::{ActionConfig, ActionRegistry};
use super::store::{StoredActions, lookup_stored};

/// Resolves the ordered actions to run for an event.
///
/// The authoritative store wins whenever it knows the binding: active rows
/// are used as-is, and a binding whose rows are all removed resolves to
/// nothing. Only a binding the store has never seen falls back to the
/// declared registry.
#[derive(Clone)]
pub struct ActionLookup {
    pool: SqlitePool,
    registry: Arc<ActionRegistry>,
}

impl ActionLookup {
    pub fn new(pool: SqlitePool, registry: Arc<ActionRegistry>) -> Self {
        Self { pool, registry }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub async fn actions_for(
        &self,
        provider: &str,
        event_type: &str,
    ) -> Result<Vec<ActionConfig>, StoreError> {
        match lookup_stored(&self.pool, provider, event_type).await? {
            StoredActions::Active(configs) => Ok(configs),
            StoredActions::RemovedOnly => {
                tracing::debug!(provider, event_type, "all actions removed; dispatching none");
                Ok(Vec::new())
            }
            StoredActions::Absent => Ok(self.registry.actions_for(provider, event_type)),
        }
    }
}
