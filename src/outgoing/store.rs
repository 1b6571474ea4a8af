use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;

use crate::clock::seconds;
use crate::db::{StoreError, format_utc, parse_uuid};
use crate::types::{OutgoingEvent, OutgoingStatus};

use super::OutgoingConfig;

/// Bodies of failed responses are not kept; only this much of a transport
/// error message is.
const LAST_ERROR_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct NewOutgoing {
    pub endpoint_url: String,
    pub event_type: String,
    pub payload: String,
    pub signing_secret: Option<String>,
}

/// A leased row together with the secret needed to sign it. The secret never
/// leaves the process in an API response.
#[derive(Debug, Clone)]
pub struct LeasedOutgoing {
    pub event: OutgoingEvent,
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Delivered,
    Retry,
    Dead,
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub outcome: ReportOutcome,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

pub async fn enqueue(
    pool: &SqlitePool,
    new: &NewOutgoing,
    now: DateTime<Utc>,
) -> Result<OutgoingEvent, StoreError> {
    let id = Uuid::new_v4();
    sqlx::query(
        r"
        INSERT INTO outgoing_events (
            id,
            endpoint_url,
            event_type,
            payload,
            signing_secret,
            status,
            attempts,
            created_at,
            next_attempt_at
        )
        VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, NULL)
        ",
    )
    .bind(id.to_string())
    .bind(&new.endpoint_url)
    .bind(&new.event_type)
    .bind(&new.payload)
    .bind(new.signing_secret.as_deref())
    .bind(format_utc(now))
    .execute(pool)
    .await?;

    get_outgoing(pool, id).await
}

pub async fn get_outgoing(pool: &SqlitePool, id: Uuid) -> Result<OutgoingEvent, StoreError> {
    sqlx::query_as::<_, OutgoingRow>(&format!("{SELECT_OUTGOING} WHERE id = ?"))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::NotFound("outgoing event not found".to_string()))?
        .try_into()
}

/// Requeues expired leases, then atomically claims up to `limit` due rows for
/// `worker_id`, oldest first.
pub async fn lease_outgoing(
    pool: &SqlitePool,
    worker_id: &str,
    limit: i64,
    lease_ms: i64,
    now: DateTime<Utc>,
) -> Result<Vec<LeasedOutgoing>, StoreError> {
    let now_str = format_utc(now);
    let lease_expires_at = format_utc(now + chrono::Duration::milliseconds(lease_ms));

    let mut tx = pool.begin().await?;

    sqlx::query(
        r"
        UPDATE outgoing_events
        SET status = 'pending',
            lease_expires_at = NULL,
            leased_by = NULL
        WHERE status = 'in_flight'
            AND lease_expires_at IS NOT NULL
            AND lease_expires_at <= ?
        ",
    )
    .bind(&now_str)
    .execute(&mut *tx)
    .await?;

    let leased_ids: Vec<String> = sqlx::query_scalar(
        r"
        WITH eligible AS (
            SELECT id
            FROM outgoing_events
            WHERE status = 'pending'
                AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
            ORDER BY created_at ASC
            LIMIT ?
        )
        UPDATE outgoing_events
        SET lease_expires_at = ?,
            leased_by = ?,
            status = 'in_flight'
        WHERE id IN (SELECT id FROM eligible)
            AND status = 'pending'
        RETURNING id
        ",
    )
    .bind(&now_str)
    .bind(limit)
    .bind(&lease_expires_at)
    .bind(worker_id)
    .fetch_all(&mut *tx)
    .await?;

    if leased_ids.is_empty() {
        tx.commit().await?;
        return Ok(Vec::new());
    }

    let mut fetch = QueryBuilder::new(format!("{SELECT_OUTGOING} WHERE id IN ("));
    let mut fetch_list = fetch.separated(", ");
    for id in &leased_ids {
        fetch_list.push_bind(id);
    }
    fetch_list.push_unseparated(") ORDER BY created_at ASC");

    let rows: Vec<OutgoingRow> = fetch.build_query_as().fetch_all(&mut *tx).await?;

    tx.commit().await?;

    rows.into_iter()
        .map(|row| {
            let signing_secret = row.signing_secret.clone();
            Ok(LeasedOutgoing {
                event: row.try_into()?,
                signing_secret,
            })
        })
        .collect()
}

/// Records the result of one delivery attempt by the lease holder. A retry on
/// the last allowed attempt becomes dead.
pub async fn report_outgoing(
    pool: &SqlitePool,
    config: &OutgoingConfig,
    id: Uuid,
    worker_id: &str,
    report: &DeliveryReport,
    now: DateTime<Utc>,
) -> Result<OutgoingStatus, StoreError> {
    let current = get_outgoing(pool, id).await?;
    ensure_lease_owner(&current, worker_id, now)?;

    let attempt_no = current.attempts + 1;
    let exhausted = attempt_no >= i64::from(config.max_attempts);
    let final_outcome = if exhausted && report.outcome == ReportOutcome::Retry {
        ReportOutcome::Dead
    } else {
        report.outcome
    };

    let mut last_error = report.error.as_deref().map(truncate);
    if exhausted && report.outcome == ReportOutcome::Retry {
        last_error = Some(format!(
            "max_attempts_exceeded ({}): {}",
            config.max_attempts,
            last_error.as_deref().unwrap_or("unknown")
        ));
    }

    let (status, next_attempt_at) = match final_outcome {
        ReportOutcome::Delivered => {
            last_error = None;
            (OutgoingStatus::Delivered, None)
        }
        ReportOutcome::Retry => {
            let delay = seconds(config.backoff_secs(attempt_no));
            (OutgoingStatus::Pending, Some(format_utc(now + delay)))
        }
        ReportOutcome::Dead => (OutgoingStatus::Dead, None),
    };

    let result = sqlx::query(
        r"
        UPDATE outgoing_events
        SET status = ?,
            attempts = attempts + 1,
            next_attempt_at = ?,
            lease_expires_at = NULL,
            leased_by = NULL,
            last_status_code = ?,
            last_error = ?
        WHERE id = ?
          AND leased_by = ?
        ",
    )
    .bind(status.as_str())
    .bind(next_attempt_at)
    .bind(report.status_code.map(i64::from))
    .bind(last_error)
    .bind(id.to_string())
    .bind(worker_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict("lease_not_owned".to_string()));
    }

    Ok(status)
}

/// Gives a leased row back without consuming an attempt, not before
/// `retry_after` has passed. Used when the endpoint's circuit is open.
pub async fn defer_outgoing(
    pool: &SqlitePool,
    id: Uuid,
    worker_id: &str,
    retry_after: Duration,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let delay = chrono::Duration::from_std(retry_after).unwrap_or(chrono::Duration::zero());
    let result = sqlx::query(
        r"
        UPDATE outgoing_events
        SET status = 'pending',
            next_attempt_at = ?,
            lease_expires_at = NULL,
            leased_by = NULL
        WHERE id = ?
          AND leased_by = ?
          AND status = 'in_flight'
        ",
    )
    .bind(format_utc(now + delay))
    .bind(id.to_string())
    .bind(worker_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::Conflict("lease_not_owned".to_string()));
    }
    Ok(())
}

fn ensure_lease_owner(
    event: &OutgoingEvent,
    worker_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let leased_by = event
        .leased_by
        .as_deref()
        .ok_or_else(|| StoreError::Conflict("lease_missing".to_string()))?;
    if leased_by != worker_id {
        return Err(StoreError::Conflict("lease_not_owned".to_string()));
    }
    let lease_expires_at = event
        .lease_expires_at
        .as_deref()
        .ok_or_else(|| StoreError::Conflict("lease_missing".to_string()))?;
    if lease_expires_at <= format_utc(now).as_str() {
        return Err(StoreError::Conflict("lease_expired".to_string()));
    }
    Ok(())
}

fn truncate(message: &str) -> String {
    message.chars().take(LAST_ERROR_LIMIT).collect()
}

const SELECT_OUTGOING: &str = r"
    SELECT
        id,
        endpoint_url,
        event_type,
        payload,
        signing_secret,
        status,
        attempts,
        created_at,
        next_attempt_at,
        lease_expires_at,
        leased_by,
        last_status_code,
        last_error
    FROM outgoing_events
";

#[derive(sqlx::FromRow)]
struct OutgoingRow {
    id: String,
    endpoint_url: String,
    event_type: String,
    payload: String,
    signing_secret: Option<String>,
    status: String,
    attempts: i64,
    created_at: String,
    next_attempt_at: Option<String>,
    lease_expires_at: Option<String>,
    leased_by: Option<String>,
    last_status_code: Option<i64>,
    last_error: Option<String>,
}

impl TryFrom<OutgoingRow> for OutgoingEvent {
    type Error = StoreError;

    fn try_from(row: OutgoingRow) -> Result<Self, Self::Error> {
        let status = OutgoingStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Parse(format!("unknown outgoing status: {}", row.status)))?;

        Ok(OutgoingEvent {
            id: parse_uuid("outgoing id", &row.id)?,
            endpoint_url: row.endpoint_url,
            event_type: row.event_type,
            payload: row.payload,
            status,
            attempts: row.attempts,
            created_at: row.created_at,
            next_attempt_at: row.next_attempt_at,
            lease_expires_at: row.lease_expires_at,
            leased_by: row.leased_by,
            last_status_code: row.last_status_code,
            last_error: row.last_error,
        })
    }
}
