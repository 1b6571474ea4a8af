use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Used when an action declares no retry delays at all.
pub const FALLBACK_RETRY_DELAY_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPolicy {
    pub priority: i64,
    #[serde(rename = "async")]
    pub run_async: bool,
    pub max_attempts: u32,
    pub retry_delays: Vec<u64>,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            priority: 100,
            run_async: true,
            max_attempts: 5,
            retry_delays: vec![30, 60, 300, 900, 3600],
        }
    }
}

impl ActionPolicy {
    /// Delay before retry number `attempt_index` (0-based): the matching entry,
    /// else the last entry, else [`FALLBACK_RETRY_DELAY_SECS`].
    pub fn retry_delay(&self, attempt_index: usize) -> Duration {
        let secs = self
            .retry_delays
            .get(attempt_index)
            .or_else(|| self.retry_delays.last())
            .copied()
            .unwrap_or(FALLBACK_RETRY_DELAY_SECS);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionConfig {
    pub provider: String,
    pub event_type: String,
    pub action_id: String,
    pub policy: ActionPolicy,
}

impl ActionConfig {
    fn dispatch_order(&self, other: &Self) -> std::cmp::Ordering {
        self.policy
            .priority
            .cmp(&other.policy.priority)
            .then_with(|| self.action_id.cmp(&other.action_id))
    }
}

pub(crate) fn sort_for_dispatch(configs: &mut [ActionConfig]) {
    configs.sort_by(ActionConfig::dispatch_order);
}

type BucketKey = (String, String);

/// Declared actions, bucketed by `(provider, event_type)` and kept in
/// dispatch order (priority, then action id).
#[derive(Debug, Default)]
pub struct ActionRegistry {
    buckets: RwLock<HashMap<BucketKey, Vec<ActionConfig>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registering an action id that already exists in the bucket replaces
    /// its policy.
    pub fn register(
        &self,
        provider: impl Into<String>,
        event_type: impl Into<String>,
        action_id: impl Into<String>,
        policy: ActionPolicy,
    ) {
        let config = ActionConfig {
            provider: provider.into(),
            event_type: event_type.into(),
            action_id: action_id.into(),
            policy,
        };
        let key = (config.provider.clone(), config.event_type.clone());

        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(key).or_default();
        bucket.retain(|existing| existing.action_id != config.action_id);
        bucket.push(config);
        sort_for_dispatch(bucket);
    }

    pub fn actions_for(&self, provider: &str, event_type: &str) -> Vec<ActionConfig> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets
            .get(&(provider.to_string(), event_type.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<ActionConfig> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<ActionConfig> = buckets.values().flatten().cloned().collect();
        all.sort_by(|a, b| {
            (&a.provider, &a.event_type)
                .cmp(&(&b.provider, &b.event_type))
                .then_with(|| a.dispatch_order(b))
        });
        all
    }

    pub fn len(&self) -> usize {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
