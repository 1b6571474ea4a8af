use chrono::{DateTime, Utc};
use sqlx::{Acquire, Sqlite, SqlitePool};
use sqlx::sqlite::SqliteQueryResult;
use uuid::Uuid;

use crate::db::{StoreError, format_utc, parse_utc, parse_uuid};
use crate::types::{ActionExecution, ExecutionStatus};

/// Stored error messages are cut to this many characters.
pub const ERROR_MESSAGE_LIMIT: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("execution {id} changed concurrently (expected lock_version {expected})")]
    VersionConflict { id: Uuid, expected: i64 },
    #[error("execution {id} is already claimed by {locked_by}")]
    AlreadyClaimed { id: Uuid, locked_by: String },
    #[error("execution {id} is {} and cannot be claimed", .status.as_str())]
    NotClaimable { id: Uuid, status: ExecutionStatus },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for ClaimError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Db(err))
    }
}

/// Creates the pending record for an (event, action) pairing, or returns the
/// one that already exists.
pub fn create_pending<'c, A>(
    conn: A,
    event_id: Uuid,
    action_id: &str,
    now: DateTime<Utc>,
) -> impl Future<Output = Result<ActionExecution, StoreError>> + Send
where
    A: Acquire<'c, Database = Sqlite> + Send,
{
    async move {
        let mut conn = conn.acquire().await?;
        let now_str = format_utc(now);
        sqlx::query(
            r"
        INSERT INTO action_executions (
            id, event_id, action_id, status, attempt_count, lock_version, created_at, updated_at
        )
        VALUES (?, ?, ?, 'pending', 0, 0, ?, ?)
        ON CONFLICT (event_id, action_id) DO NOTHING
        ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(event_id.to_string())
        .bind(action_id)
        .bind(&now_str)
        .bind(&now_str)
        .execute(&mut *conn)
        .await?;

        find_execution(&mut *conn, event_id, action_id)
            .await?
            .ok_or_else(|| StoreError::NotFound("execution not found".to_string()))
    }
}

pub async fn get_execution(pool: &SqlitePool, id: Uuid) -> Result<ActionExecution, StoreError> {
    sqlx::query_as::<_, ExecutionRow>(&format!("{SELECT_EXECUTION} WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("execution not found".to_string()))?
        .try_into()
}

pub fn find_execution<'c, A>(
    conn: A,
    event_id: Uuid,
    action_id: &str,
) -> impl Future<Output = Result<Option<ActionExecution>, StoreError>> + Send
where
    A: Acquire<'c, Database = Sqlite> + Send,
{
    async move {
        let mut conn = conn.acquire().await?;
        sqlx::query_as::<_, ExecutionRow>(&format!(
            "{SELECT_EXECUTION} WHERE event_id = ? AND action_id = ?"
        ))
        .bind(event_id.to_string())
        .bind(action_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(ActionExecution::try_from)
        .transpose()
    }
}

pub fn list_for_event<'c, A>(
    conn: A,
    event_id: Uuid,
) -> impl Future<Output = Result<Vec<ActionExecution>, StoreError>> + Send
where
    A: Acquire<'c, Database = Sqlite> + Send,
{
    async move {
        let mut conn = conn.acquire().await?;
        sqlx::query_as::<_, ExecutionRow>(&format!(
            "{SELECT_EXECUTION} WHERE event_id = ? ORDER BY created_at ASC, action_id ASC"
        ))
        .bind(event_id.to_string())
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(ActionExecution::try_from)
        .collect()
    }
}

/// Claims `record` for `worker_id`.
///
/// A pending record is claimable, and so is a processing record whose claim
/// is older than `lock_timeout`. The write only applies if the stored
/// `lock_version` still equals the one in `record`; of two workers racing
/// with the same copy exactly one wins and the other gets
/// [`ClaimError::VersionConflict`] without touching the row.
pub async fn acquire_lock(
    pool: &SqlitePool,
    record: &mut ActionExecution,
    worker_id: &str,
    lock_timeout: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<(), ClaimError> {
    let stale_before = now - lock_timeout;
    match record.status {
        ExecutionStatus::Pending => {}
        ExecutionStatus::Processing => {
            let locked_at = record
                .locked_at
                .as_deref()
                .map(|value| parse_utc("locked_at", value))
                .transpose()?;
            if let Some(locked_at) = locked_at
                && locked_at > stale_before
            {
                return Err(ClaimError::AlreadyClaimed {
                    id: record.id,
                    locked_by: record.locked_by.clone().unwrap_or_default(),
                });
            }
            tracing::warn!(
                execution_id = %record.id,
                previous_owner = record.locked_by.as_deref().unwrap_or("unknown"),
                "reclaiming stale execution lock"
            );
        }
        status @ (ExecutionStatus::Processed | ExecutionStatus::Failed) => {
            return Err(ClaimError::NotClaimable {
                id: record.id,
                status,
            });
        }
    }

    let now_str = format_utc(now);
    let result = sqlx::query(
        r"
        UPDATE action_executions
        SET status = 'processing',
            locked_at = ?,
            locked_by = ?,
            lock_version = lock_version + 1,
            updated_at = ?
        WHERE id = ?
          AND lock_version = ?
          AND (
              status = 'pending'
              OR (status = 'processing' AND (locked_at IS NULL OR locked_at <= ?))
          )
        ",
    )
    .bind(&now_str)
    .bind(worker_id)
    .bind(&now_str)
    .bind(record.id.to_string())
    .bind(record.lock_version)
    .bind(format_utc(stale_before))
    .execute(pool)
    .await?;
    ensure_applied(&result, record)?;

    record.status = ExecutionStatus::Processing;
    record.locked_at = Some(now_str);
    record.locked_by = Some(worker_id.to_string());
    record.lock_version += 1;
    Ok(())
}

/// Counts one attempt. Kept separate from failure marking so retries are
/// counted independently of how an attempt ends.
pub async fn increment_attempt(
    pool: &SqlitePool,
    record: &mut ActionExecution,
    now: DateTime<Utc>,
) -> Result<(), ClaimError> {
    let now_str = format_utc(now);
    let result = sqlx::query(
        r"
        UPDATE action_executions
        SET attempt_count = attempt_count + 1,
            last_attempt_at = ?,
            lock_version = lock_version + 1,
            updated_at = ?
        WHERE id = ? AND lock_version = ?
        ",
    )
    .bind(&now_str)
    .bind(&now_str)
    .bind(record.id.to_string())
    .bind(record.lock_version)
    .execute(pool)
    .await?;
    ensure_applied(&result, record)?;

    record.attempt_count += 1;
    record.last_attempt_at = Some(now_str);
    record.lock_version += 1;
    Ok(())
}

pub async fn mark_processed(
    pool: &SqlitePool,
    record: &mut ActionExecution,
    now: DateTime<Utc>,
) -> Result<(), ClaimError> {
    let result = sqlx::query(
        r"
        UPDATE action_executions
        SET status = 'processed',
            error_message = NULL,
            locked_at = NULL,
            locked_by = NULL,
            lock_version = lock_version + 1,
            updated_at = ?
        WHERE id = ? AND lock_version = ?
        ",
    )
    .bind(format_utc(now))
    .bind(record.id.to_string())
    .bind(record.lock_version)
    .execute(pool)
    .await?;
    ensure_applied(&result, record)?;

    record.status = ExecutionStatus::Processed;
    record.error_message = None;
    record.locked_at = None;
    record.locked_by = None;
    record.lock_version += 1;
    Ok(())
}

/// Records the failure and releases the claim. Does not count an attempt.
pub async fn mark_failed(
    pool: &SqlitePool,
    record: &mut ActionExecution,
    error: &str,
    now: DateTime<Utc>,
) -> Result<(), ClaimError> {
    let message = truncate_error(error);
    let now_str = format_utc(now);
    let result = sqlx::query(
        r"
        UPDATE action_executions
        SET status = 'failed',
            error_message = ?,
            last_attempt_at = ?,
            locked_at = NULL,
            locked_by = NULL,
            lock_version = lock_version + 1,
            updated_at = ?
        WHERE id = ? AND lock_version = ?
        ",
    )
    .bind(&message)
    .bind(&now_str)
    .bind(&now_str)
    .bind(record.id.to_string())
    .bind(record.lock_version)
    .execute(pool)
    .await?;
    ensure_applied(&result, record)?;

    record.status = ExecutionStatus::Failed;
    record.error_message = Some(message);
    record.last_attempt_at = Some(now_str);
    record.locked_at = None;
    record.locked_by = None;
    record.lock_version += 1;
    Ok(())
}

/// Back to pending with the claim cleared; attempt count and last error are
/// kept.
pub async fn reset_for_retry(
    pool: &SqlitePool,
    record: &mut ActionExecution,
    now: DateTime<Utc>,
) -> Result<(), ClaimError> {
    let result = sqlx::query(
        r"
        UPDATE action_executions
        SET status = 'pending',
            locked_at = NULL,
            locked_by = NULL,
            lock_version = lock_version + 1,
            updated_at = ?
        WHERE id = ? AND lock_version = ?
        ",
    )
    .bind(format_utc(now))
    .bind(record.id.to_string())
    .bind(record.lock_version)
    .execute(pool)
    .await?;
    ensure_applied(&result, record)?;

    record.status = ExecutionStatus::Pending;
    record.locked_at = None;
    record.locked_by = None;
    record.lock_version += 1;
    Ok(())
}

/// Fresh start for an operator replay: pending, zero attempts, no error.
/// Refuses records another worker is currently holding.
pub fn reset_for_replay<'c, A>(
    conn: A,
    record: &mut ActionExecution,
    now: DateTime<Utc>,
) -> impl Future<Output = Result<(), ClaimError>> + Send
where
    A: Acquire<'c, Database = Sqlite> + Send,
{
    async move {
        if record.status == ExecutionStatus::Processing {
            return Err(ClaimError::AlreadyClaimed {
                id: record.id,
                locked_by: record.locked_by.clone().unwrap_or_default(),
            });
        }

        let mut conn = conn.acquire().await?;
        let result = sqlx::query(
            r"
        UPDATE action_executions
        SET status = 'pending',
            attempt_count = 0,
            error_message = NULL,
            locked_at = NULL,
            locked_by = NULL,
            lock_version = lock_version + 1,
            updated_at = ?
        WHERE id = ? AND lock_version = ?
        ",
        )
        .bind(format_utc(now))
        .bind(record.id.to_string())
        .bind(record.lock_version)
        .execute(&mut *conn)
        .await?;
        ensure_applied(&result, record)?;

        record.status = ExecutionStatus::Pending;
        record.attempt_count = 0;
        record.error_message = None;
        record.locked_at = None;
        record.locked_by = None;
        record.lock_version += 1;
        Ok(())
    }
}

pub fn max_attempts_reached(record: &ActionExecution, max_attempts: u32) -> bool {
    record.attempt_count >= i64::from(max_attempts)
}

fn ensure_applied(result: &SqliteQueryResult, record: &ActionExecution) -> Result<(), ClaimError> {
    if result.rows_affected() == 0 {
        return Err(ClaimError::VersionConflict {
            id: record.id,
            expected: record.lock_version,
        });
    }
    Ok(())
}

fn truncate_error(error: &str) -> String {
    error.chars().take(ERROR_MESSAGE_LIMIT).collect()
}

const SELECT_EXECUTION: &str = "SELECT \
        id, \
        event_id, \
        action_id, \
        status, \
        attempt_count, \
        last_attempt_at, \
        error_message, \
        locked_at, \
        locked_by, \
        lock_version \
    FROM action_executions";

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    event_id: String,
    action_id: String,
    status: String,
    attempt_count: i64,
    last_attempt_at: Option<String>,
    error_message: Option<String>,
    locked_at: Option<String>,
    locked_by: Option<String>,
    lock_version: i64,
}

impl TryFrom<ExecutionRow> for ActionExecution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let status = ExecutionStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Parse(format!("unknown execution status: {}", row.status)))?;

        Ok(ActionExecution {
            id: parse_uuid("execution id", &row.id)?,
            event_id: parse_uuid("event id", &row.event_id)?,
            action_id: row.action_id,
            status,
            attempt_count: row.attempt_count,
            last_attempt_at: row.last_attempt_at,
            error_message: row.error_message,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            lock_version: row.lock_version,
        })
    }
}
