use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::clock::Clock;
use crate::db::StoreError;
use crate::events::get_event;
use crate::executions::{ActionExecutor, ActionOutcome};

use super::store::{NewOutgoing, enqueue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub url: String,
    pub secret: Option<String>,
}

/// Executes forwarding actions by enqueueing the inbound payload for
/// outgoing delivery. Actions without a target fail terminally.
pub struct ForwardingExecutor {
    pool: SqlitePool,
    targets: HashMap<String, ForwardTarget>,
    clock: Arc<dyn Clock>,
}

impl ForwardingExecutor {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            targets: HashMap::new(),
            clock,
        }
    }

    pub fn add_target(&mut self, action_id: impl Into<String>, target: ForwardTarget) {
        self.targets.insert(action_id.into(), target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl ActionExecutor for ForwardingExecutor {
    async fn execute(&self, action_id: &str, event_id: Uuid, attempt: i64) -> ActionOutcome {
        let Some(target) = self.targets.get(action_id) else {
            return ActionOutcome::FatalFailure(format!("no executor registered for {action_id}"));
        };

        let event = match get_event(&self.pool, event_id).await {
            Ok(event) => event,
            Err(StoreError::NotFound(message)) => return ActionOutcome::FatalFailure(message),
            Err(err) => return ActionOutcome::RetryableFailure(err.to_string()),
        };

        let new = NewOutgoing {
            endpoint_url: target.url.clone(),
            event_type: event.event_type,
            payload: event.payload,
            signing_secret: target.secret.clone(),
        };
        match enqueue(&self.pool, &new, self.clock.now()).await {
            Ok(outgoing) => {
                tracing::debug!(
                    action_id,
                    %event_id,
                    attempt,
                    outgoing_id = %outgoing.id,
                    "event forwarded"
                );
                ActionOutcome::Success
            }
            Err(err) => ActionOutcome::RetryableFailure(err.to_string()),
        }
    }
}
