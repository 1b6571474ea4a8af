use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sqlx::{Acquire, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::crypto::Headers;
use crate::db::{StoreError, format_utc, is_unique_violation, parse_uuid};
use crate::types::{DedupState, EventStatus, ExecutionStatus, IncomingEvent};

use super::aggregate_status;

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub provider: String,
    pub external_id: String,
    pub event_type: String,
    pub payload: String,
    pub headers: Headers,
}

/// Inserts the event, or returns the row already stored for
/// `(provider, external_id)` tagged [`DedupState::Duplicate`].
///
/// The uniqueness constraint decides races: of N concurrent callers exactly
/// one insert succeeds and the rest read back that same row.
pub async fn find_or_create(
    pool: &SqlitePool,
    new: &NewEvent,
    now: DateTime<Utc>,
) -> Result<(IncomingEvent, DedupState), StoreError> {
    let id = Uuid::new_v4();
    let now_str = format_utc(now);
    let headers = serde_json::to_string(&new.headers)
        .map_err(|err| StoreError::Parse(format!("invalid headers: {err}")))?;

    let inserted = sqlx::query(
        r"
        INSERT INTO incoming_events (
            id,
            provider,
            external_id,
            event_type,
            payload,
            headers,
            dedup_state,
            status,
            received_at,
            updated_at,
            archived_at
        )
        VALUES (?, ?, ?, ?, ?, ?, 'unique', 'received', ?, ?, NULL)
        ",
    )
    .bind(id.to_string())
    .bind(&new.provider)
    .bind(&new.external_id)
    .bind(&new.event_type)
    .bind(&new.payload)
    .bind(&headers)
    .bind(&now_str)
    .bind(&now_str)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => {
            let event = get_event(pool, id).await?;
            Ok((event, DedupState::Unique))
        }
        Err(err) if is_unique_violation(&err) => {
            let existing = find_by_external_id(pool, &new.provider, &new.external_id)
                .await?
                .ok_or_else(|| {
                    StoreError::Conflict("duplicate event vanished after conflict".to_string())
                })?;
            Ok((existing, DedupState::Duplicate))
        }
        Err(err) => Err(err.into()),
    }
}

pub fn get_event<'c, A>(conn: A, event_id: Uuid) -> impl Future<Output = Result<IncomingEvent, StoreError>> + Send
where
    A: Acquire<'c, Database = Sqlite> + Send,
{
    async move {
        let mut conn = conn.acquire().await?;
        sqlx::query_as::<_, EventRow>(&format!("{SELECT_EVENT} WHERE id = ?"))
            .bind(event_id.to_string())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::NotFound("event not found".to_string()))?
            .try_into()
    }
}

pub async fn find_by_external_id(
    pool: &SqlitePool,
    provider: &str,
    external_id: &str,
) -> Result<Option<IncomingEvent>, StoreError> {
    sqlx::query_as::<_, EventRow>(&format!(
        "{SELECT_EVENT} WHERE provider = ? AND external_id = ?"
    ))
    .bind(provider)
    .bind(external_id)
    .fetch_optional(pool)
    .await?
    .map(IncomingEvent::try_from)
    .transpose()
}

/// Operator-triggered redelivery. Never chosen by ingestion itself. Takes a
/// pool or an open transaction.
pub fn mark_replayed<'c, A>(
    conn: A,
    event_id: Uuid,
    now: DateTime<Utc>,
) -> impl Future<Output = Result<IncomingEvent, StoreError>> + Send
where
    A: Acquire<'c, Database = Sqlite> + Send,
{
    async move {
        let mut conn = conn.acquire().await?;
        let event = get_event(&mut *conn, event_id).await?;
        if event.archived_at.is_some() {
            return Err(StoreError::Conflict("event_archived".to_string()));
        }

        sqlx::query(
            r"
        UPDATE incoming_events
        SET dedup_state = 'replayed',
            status = 'received',
            updated_at = ?
        WHERE id = ?
        ",
        )
        .bind(format_utc(now))
        .bind(event_id.to_string())
        .execute(&mut *conn)
        .await?;

        get_event(&mut *conn, event_id).await
    }
}

pub async fn archive_event(
    pool: &SqlitePool,
    event_id: Uuid,
    now: DateTime<Utc>,
) -> Result<IncomingEvent, StoreError> {
    let now_str = format_utc(now);
    let result = sqlx::query(
        r"
        UPDATE incoming_events
        SET archived_at = COALESCE(archived_at, ?),
            updated_at = ?
        WHERE id = ?
        ",
    )
    .bind(&now_str)
    .bind(&now_str)
    .bind(event_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("event not found".to_string()));
    }
    get_event(pool, event_id).await
}

pub async fn set_status(
    pool: &SqlitePool,
    event_id: Uuid,
    status: EventStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE incoming_events SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(format_utc(now))
        .bind(event_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Re-derives the event status from its action records and stores it.
pub async fn recompute_status(
    pool: &SqlitePool,
    event_id: Uuid,
    now: DateTime<Utc>,
) -> Result<EventStatus, StoreError> {
    let raw: Vec<String> =
        sqlx::query_scalar("SELECT status FROM action_executions WHERE event_id = ?")
            .bind(event_id.to_string())
            .fetch_all(pool)
            .await?;

    let statuses = raw
        .iter()
        .map(|value| {
            ExecutionStatus::parse(value)
                .ok_or_else(|| StoreError::Parse(format!("unknown execution status: {value}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let status = aggregate_status(&statuses);
    set_status(pool, event_id, status, now).await?;
    Ok(status)
}

const SELECT_EVENT: &str = "SELECT \
        id, \
        provider, \
        external_id, \
        event_type, \
        payload, \
        headers, \
        dedup_state, \
        status, \
        received_at, \
        archived_at \
    FROM incoming_events";

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    provider: String,
    external_id: String,
    event_type: String,
    payload: String,
    headers: String,
    dedup_state: String,
    status: String,
    received_at: String,
    archived_at: Option<String>,
}

impl TryFrom<EventRow> for IncomingEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let headers: BTreeMap<String, String> = serde_json::from_str(&row.headers)
            .map_err(|err| StoreError::Parse(format!("invalid headers JSON: {err}")))?;
        let dedup_state = DedupState::parse(&row.dedup_state)
            .ok_or_else(|| StoreError::Parse(format!("unknown dedup state: {}", row.dedup_state)))?;
        let status = EventStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Parse(format!("unknown status: {}", row.status)))?;

        Ok(IncomingEvent {
            id: parse_uuid("event id", &row.id)?,
            provider: row.provider,
            external_id: row.external_id,
            event_type: row.event_type,
            payload: row.payload,
            headers,
            dedup_state,
            status,
            received_at: row.received_at,
            archived_at: row.archived_at,
        })
    }
}
