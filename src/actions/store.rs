use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{StoreError, format_utc};

use super::registry::{ActionConfig, ActionPolicy, ActionRegistry, sort_for_dispatch};

/// What the authoritative store knows about a `(provider, event_type)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredActions {
    /// No row at all, active or removed.
    Absent,
    /// Rows exist but every one of them is logically removed.
    RemovedOnly,
    /// Active configs in dispatch order.
    Active(Vec<ActionConfig>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped_removed: usize,
}

pub async fn lookup_stored(
    pool: &SqlitePool,
    provider: &str,
    event_type: &str,
) -> Result<StoredActions, StoreError> {
    let rows = sqlx::query_as::<_, ActionConfigRow>(
        r"
        SELECT provider, event_type, action_id, priority, run_async, max_attempts,
               retry_delays, removed_at
        FROM action_configs
        WHERE provider = ? AND event_type = ?
        ",
    )
    .bind(provider)
    .bind(event_type)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok(StoredActions::Absent);
    }

    let mut active = rows
        .into_iter()
        .filter(|row| row.removed_at.is_none())
        .map(ActionConfig::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    if active.is_empty() {
        return Ok(StoredActions::RemovedOnly);
    }

    sort_for_dispatch(&mut active);
    Ok(StoredActions::Active(active))
}

/// Inserts or refreshes one config. A logically removed row is left removed.
pub async fn upsert_config(
    pool: &SqlitePool,
    config: &ActionConfig,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    upsert(pool, config, now).await.map(|_| ())
}

/// Persists every declared action. New bindings are inserted, active ones
/// get the declared policy, removed ones stay removed.
pub async fn sync_registry(
    pool: &SqlitePool,
    registry: &ActionRegistry,
    now: DateTime<Utc>,
) -> Result<SyncSummary, StoreError> {
    let mut summary = SyncSummary::default();
    for config in registry.all() {
        match upsert(pool, &config, now).await? {
            Upserted::Inserted => summary.inserted += 1,
            Upserted::Updated => summary.updated += 1,
            Upserted::SkippedRemoved => summary.skipped_removed += 1,
        }
    }

    tracing::info!(
        inserted = summary.inserted,
        updated = summary.updated,
        skipped_removed = summary.skipped_removed,
        "action registry synced"
    );
    Ok(summary)
}

/// Marks a binding removed, writing a tombstone row if it was never stored so
/// the removal is authoritative over the declared registry.
pub async fn mark_removed(
    pool: &SqlitePool,
    provider: &str,
    event_type: &str,
    action_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let now_str = format_utc(now);
    let defaults = ActionPolicy::default();
    let retry_delays = encode_delays(&defaults.retry_delays)?;

    sqlx::query(
        r"
        INSERT INTO action_configs (
            id, provider, event_type, action_id, priority, run_async, max_attempts,
            retry_delays, created_at, updated_at, removed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (provider, event_type, action_id) DO UPDATE SET
            removed_at = COALESCE(action_configs.removed_at, excluded.removed_at),
            updated_at = excluded.updated_at
        ",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(provider)
    .bind(event_type)
    .bind(action_id)
    .bind(defaults.priority)
    .bind(defaults.run_async)
    .bind(i64::from(defaults.max_attempts))
    .bind(&retry_delays)
    .bind(&now_str)
    .bind(&now_str)
    .bind(&now_str)
    .execute(pool)
    .await?;

    tracing::info!(provider, event_type, action_id, "action marked removed");
    Ok(())
}

pub async fn restore(
    pool: &SqlitePool,
    provider: &str,
    event_type: &str,
    action_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r"
        UPDATE action_configs
        SET removed_at = NULL,
            updated_at = ?
        WHERE provider = ? AND event_type = ? AND action_id = ?
        ",
    )
    .bind(format_utc(now))
    .bind(provider)
    .bind(event_type)
    .bind(action_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("action config not found".to_string()));
    }
    Ok(())
}

enum Upserted {
    Inserted,
    Updated,
    SkippedRemoved,
}

async fn upsert(
    pool: &SqlitePool,
    config: &ActionConfig,
    now: DateTime<Utc>,
) -> Result<Upserted, StoreError> {
    let now_str = format_utc(now);
    let retry_delays = encode_delays(&config.policy.retry_delays)?;

    let updated = sqlx::query(
        r"
        UPDATE action_configs
        SET priority = ?,
            run_async = ?,
            max_attempts = ?,
            retry_delays = ?,
            updated_at = ?
        WHERE provider = ? AND event_type = ? AND action_id = ?
          AND removed_at IS NULL
        ",
    )
    .bind(config.policy.priority)
    .bind(config.policy.run_async)
    .bind(i64::from(config.policy.max_attempts))
    .bind(&retry_delays)
    .bind(&now_str)
    .bind(&config.provider)
    .bind(&config.event_type)
    .bind(&config.action_id)
    .execute(pool)
    .await?;
    if updated.rows_affected() > 0 {
        return Ok(Upserted::Updated);
    }

    let inserted = sqlx::query(
        r"
        INSERT INTO action_configs (
            id, provider, event_type, action_id, priority, run_async, max_attempts,
            retry_delays, created_at, updated_at, removed_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        ON CONFLICT (provider, event_type, action_id) DO NOTHING
        ",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&config.provider)
    .bind(&config.event_type)
    .bind(&config.action_id)
    .bind(config.policy.priority)
    .bind(config.policy.run_async)
    .bind(i64::from(config.policy.max_attempts))
    .bind(&retry_delays)
    .bind(&now_str)
    .bind(&now_str)
    .execute(pool)
    .await?;

    if inserted.rows_affected() > 0 {
        Ok(Upserted::Inserted)
    } else {
        Ok(Upserted::SkippedRemoved)
    }
}

fn encode_delays(delays: &[u64]) -> Result<String, StoreError> {
    serde_json::to_string(delays)
        .map_err(|err| StoreError::Parse(format!("invalid retry delays: {err}")))
}

#[derive(sqlx::FromRow)]
struct ActionConfigRow {
    provider: String,
    event_type: String,
    action_id: String,
    priority: i64,
    run_async: bool,
    max_attempts: i64,
    retry_delays: String,
    removed_at: Option<String>,
}

impl TryFrom<ActionConfigRow> for ActionConfig {
    type Error = StoreError;

    fn try_from(row: ActionConfigRow) -> Result<Self, Self::Error> {
        let retry_delays: Vec<u64> = serde_json::from_str(&row.retry_delays)
            .map_err(|err| StoreError::Parse(format!("invalid retry_delays JSON: {err}")))?;
        let max_attempts = u32::try_from(row.max_attempts)
            .map_err(|_| StoreError::Parse(format!("invalid max_attempts: {}", row.max_attempts)))?;

        Ok(ActionConfig {
            provider: row.provider,
            event_type: row.event_type,
            action_id: row.action_id,
            policy: ActionPolicy {
                priority: row.priority,
                run_async: row.run_async,
                max_attempts,
                retry_delays,
            },
        })
    }
}
