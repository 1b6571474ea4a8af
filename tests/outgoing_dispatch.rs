#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use hookrelay::{
    circuit_breaker::{CircuitBreaker, CircuitPolicy},
    clock::{Clock, ManualClock},
    crypto::Headers,
    db::{StoreError, format_utc},
    events::{NewEvent, find_or_create},
    executions::{ActionExecutor, ActionOutcome},
    outgoing::{
        BatchSummary, Deliverer, DeliveryError, DeliveryReport, DeliveryRequest,
        ForwardTarget, ForwardingExecutor, NewOutgoing, OutgoingConfig, OutgoingDispatcher,
        ReportOutcome, defer_outgoing, enqueue, get_outgoing, lease_outgoing, report_outgoing,
        sign_payload,
    },
    types::{CircuitStatus, OutgoingStatus},
};
use sqlx::SqlitePool;
use uuid::Uuid;

use common::{manual_clock, setup_db, start_time};

const ENDPOINT: &str = "https://hooks.example.com/in";

fn new_outgoing(secret: Option<&str>) -> NewOutgoing {
    NewOutgoing {
        endpoint_url: ENDPOINT.to_string(),
        event_type: "order.created".to_string(),
        payload: r#"{"order":1}"#.to_string(),
        signing_secret: secret.map(str::to_string),
    }
}

fn report(outcome: ReportOutcome, status_code: Option<u16>, error: Option<&str>) -> DeliveryReport {
    DeliveryReport {
        outcome,
        status_code,
        error: error.map(str::to_string),
    }
}

async fn enqueue_many(pool: &SqlitePool, count: usize) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for i in 0..count {
        let now = start_time() + ChronoDuration::milliseconds(i as i64);
        ids.push(enqueue(pool, &new_outgoing(None), now).await.unwrap().id);
    }
    ids
}

#[derive(Debug, Clone)]
struct SentRequest {
    endpoint_url: String,
    event_id: Uuid,
    signature: Option<String>,
}

/// Answers with scripted results, then with `fallback`.
struct FakeDeliverer {
    results: Mutex<VecDeque<Result<u16, DeliveryError>>>,
    fallback: Result<u16, DeliveryError>,
    sent: Mutex<Vec<SentRequest>>,
}

impl FakeDeliverer {
    fn always(result: Result<u16, DeliveryError>) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            fallback: result,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deliverer for FakeDeliverer {
    async fn deliver(&self, request: &DeliveryRequest<'_>) -> Result<u16, DeliveryError> {
        self.sent.lock().unwrap().push(SentRequest {
            endpoint_url: request.endpoint_url.to_string(),
            event_id: request.event_id,
            signature: request.signature.clone(),
        });
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct DispatchFixture {
    pool: SqlitePool,
    clock: Arc<ManualClock>,
    deliverer: Arc<FakeDeliverer>,
    dispatcher: OutgoingDispatcher,
    _db: common::TestDb,
}

async fn dispatch_fixture(config: OutgoingConfig, deliverer: FakeDeliverer) -> DispatchFixture {
    let db = setup_db().await;
    let clock = manual_clock();
    let dyn_clock: Arc<dyn Clock> = clock.clone();
    let deliverer = Arc::new(deliverer);
    let dispatcher = OutgoingDispatcher::new(
        db.pool.clone(),
        config,
        Arc::new(CircuitBreaker::new(dyn_clock.clone())),
        deliverer.clone(),
        dyn_clock,
    )
    .with_worker_id("dispatcher-test");

    DispatchFixture {
        pool: db.pool.clone(),
        clock,
        deliverer,
        dispatcher,
        _db: db,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue leasing
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn lease_claims_oldest_rows_once() {
    let db = setup_db().await;
    let ids = enqueue_many(&db.pool, 3).await;
    let now = start_time() + ChronoDuration::seconds(1);

    let first = lease_outgoing(&db.pool, "w1", 2, 30_000, now).await.unwrap();
    let first_ids: Vec<Uuid> = first.iter().map(|item| item.event.id).collect();
    assert_eq!(first_ids, ids[..2].to_vec());
    for item in &first {
        assert_eq!(item.event.status, OutgoingStatus::InFlight);
        assert_eq!(item.event.leased_by.as_deref(), Some("w1"));
        assert_eq!(
            item.event.lease_expires_at.as_deref(),
            Some(format_utc(now + ChronoDuration::seconds(30)).as_str())
        );
    }

    let second = lease_outgoing(&db.pool, "w2", 10, 30_000, now).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].event.id, ids[2]);

    let third = lease_outgoing(&db.pool, "w3", 10, 30_000, now).await.unwrap();
    assert!(third.is_empty());
}

#[tokio::test]
async fn expired_lease_is_requeued_for_another_worker() {
    let db = setup_db().await;
    let ids = enqueue_many(&db.pool, 1).await;
    let now = start_time();

    lease_outgoing(&db.pool, "w1", 1, 1_000, now).await.unwrap();
    let later = now + ChronoDuration::seconds(2);
    let taken = lease_outgoing(&db.pool, "w2", 1, 1_000, later).await.unwrap();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].event.id, ids[0]);
    assert_eq!(taken[0].event.leased_by.as_deref(), Some("w2"));

    let err = report_outgoing(
        &db.pool,
        &OutgoingConfig::default(),
        ids[0],
        "w1",
        &report(ReportOutcome::Delivered, Some(200), None),
        later,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(reason) if reason == "lease_not_owned"));
}

#[tokio::test]
async fn report_after_lease_expiry_is_refused() {
    let db = setup_db().await;
    let ids = enqueue_many(&db.pool, 1).await;
    let now = start_time();

    lease_outgoing(&db.pool, "w1", 1, 1_000, now).await.unwrap();
    let err = report_outgoing(
        &db.pool,
        &OutgoingConfig::default(),
        ids[0],
        "w1",
        &report(ReportOutcome::Delivered, Some(200), None),
        now + ChronoDuration::seconds(1),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(reason) if reason == "lease_expired"));
}

#[tokio::test]
async fn signing_secret_travels_with_the_lease_only() {
    let db = setup_db().await;
    let created = enqueue(&db.pool, &new_outgoing(Some("shh")), start_time())
        .await
        .unwrap();

    let json = serde_json::to_value(&created).unwrap();
    assert!(json.get("signing_secret").is_none());

    let leased = lease_outgoing(&db.pool, "w1", 1, 30_000, start_time()).await.unwrap();
    assert_eq!(leased[0].signing_secret.as_deref(), Some("shh"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Reporting
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn retry_report_schedules_exponential_backoff() {
    let db = setup_db().await;
    let ids = enqueue_many(&db.pool, 1).await;
    let config = OutgoingConfig {
        backoff_base_secs: 2,
        ..OutgoingConfig::default()
    };
    let mut now = start_time();

    for (attempt, expected_delay) in [(1, 2), (2, 4), (3, 8)] {
        let leased = lease_outgoing(&db.pool, "w1", 1, 30_000, now).await.unwrap();
        assert_eq!(leased.len(), 1, "attempt {attempt} should be due");

        let status = report_outgoing(
            &db.pool,
            &config,
            ids[0],
            "w1",
            &report(ReportOutcome::Retry, Some(503), Some("unexpected status 503")),
            now,
        )
        .await
        .unwrap();
        assert_eq!(status, OutgoingStatus::Pending);

        let row = get_outgoing(&db.pool, ids[0]).await.unwrap();
        let due = now + ChronoDuration::seconds(expected_delay);
        assert_eq!(row.attempts, attempt);
        assert_eq!(row.next_attempt_at.as_deref(), Some(format_utc(due).as_str()));
        assert_eq!(row.last_status_code, Some(503));
        assert!(row.leased_by.is_none());

        let early = lease_outgoing(&db.pool, "w1", 1, 30_000, due - ChronoDuration::milliseconds(1))
            .await
            .unwrap();
        assert!(early.is_empty());
        now = due;
    }
}

#[tokio::test]
async fn retry_on_last_attempt_goes_dead() {
    let db = setup_db().await;
    let ids = enqueue_many(&db.pool, 1).await;
    let config = OutgoingConfig {
        max_attempts: 2,
        ..OutgoingConfig::default()
    };
    let mut now = start_time();

    for expected in [OutgoingStatus::Pending, OutgoingStatus::Dead] {
        lease_outgoing(&db.pool, "w1", 1, 30_000, now).await.unwrap();
        let status = report_outgoing(
            &db.pool,
            &config,
            ids[0],
            "w1",
            &report(ReportOutcome::Retry, None, Some("boom")),
            now,
        )
        .await
        .unwrap();
        assert_eq!(status, expected);
        now += ChronoDuration::hours(1);
    }

    let row = get_outgoing(&db.pool, ids[0]).await.unwrap();
    assert_eq!(row.attempts, 2);
    assert_eq!(row.last_error.as_deref(), Some("max_attempts_exceeded (2): boom"));
    assert!(row.next_attempt_at.is_none());

    let leased = lease_outgoing(&db.pool, "w1", 1, 30_000, now).await.unwrap();
    assert!(leased.is_empty());
}

#[tokio::test]
async fn long_errors_are_truncated_and_cleared_on_delivery() {
    let db = setup_db().await;
    let ids = enqueue_many(&db.pool, 1).await;
    let config = OutgoingConfig::default();
    let now = start_time();

    lease_outgoing(&db.pool, "w1", 1, 30_000, now).await.unwrap();
    let long_error = "x".repeat(1500);
    report_outgoing(
        &db.pool,
        &config,
        ids[0],
        "w1",
        &report(ReportOutcome::Retry, None, Some(&long_error)),
        now,
    )
    .await
    .unwrap();
    let row = get_outgoing(&db.pool, ids[0]).await.unwrap();
    assert_eq!(row.last_error.map(|e| e.chars().count()), Some(1000));

    let later = now + ChronoDuration::seconds(1);
    lease_outgoing(&db.pool, "w1", 1, 30_000, later).await.unwrap();
    let status = report_outgoing(
        &db.pool,
        &config,
        ids[0],
        "w1",
        &report(ReportOutcome::Delivered, Some(204), None),
        later,
    )
    .await
    .unwrap();
    assert_eq!(status, OutgoingStatus::Delivered);

    let row = get_outgoing(&db.pool, ids[0]).await.unwrap();
    assert_eq!(row.attempts, 2);
    assert_eq!(row.last_status_code, Some(204));
    assert!(row.last_error.is_none());
}

#[tokio::test]
async fn defer_releases_without_consuming_an_attempt() {
    let db = setup_db().await;
    let ids = enqueue_many(&db.pool, 1).await;
    let now = start_time();

    lease_outgoing(&db.pool, "w1", 1, 30_000, now).await.unwrap();
    defer_outgoing(&db.pool, ids[0], "w1", std::time::Duration::from_secs(30), now)
        .await
        .unwrap();

    let row = get_outgoing(&db.pool, ids[0]).await.unwrap();
    assert_eq!(row.status, OutgoingStatus::Pending);
    assert_eq!(row.attempts, 0);
    assert_eq!(
        row.next_attempt_at.as_deref(),
        Some(format_utc(now + ChronoDuration::seconds(30)).as_str())
    );

    let err = defer_outgoing(&db.pool, ids[0], "w1", std::time::Duration::from_secs(30), now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_delivery_is_signed_when_secret_is_set() {
    let fx = dispatch_fixture(OutgoingConfig::default(), FakeDeliverer::always(Ok(200))).await;
    let signed = enqueue(&fx.pool, &new_outgoing(Some("shh")), start_time())
        .await
        .unwrap();
    let unsigned = enqueue(
        &fx.pool,
        &new_outgoing(None),
        start_time() + ChronoDuration::milliseconds(1),
    )
    .await
    .unwrap();

    let summary = fx.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            leased: 2,
            delivered: 2,
            ..BatchSummary::default()
        }
    );

    let sent = fx.deliverer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].event_id, signed.id);
    assert_eq!(sent[0].endpoint_url, ENDPOINT);
    let expected = sign_payload("shh", fx.clock.now().timestamp(), &signed.payload);
    assert_eq!(sent[0].signature.as_deref(), Some(expected.as_str()));
    assert!(expected.starts_with(&format!("t={},v1=", fx.clock.now().timestamp())));
    assert_eq!(sent[1].event_id, unsigned.id);
    assert!(sent[1].signature.is_none());

    for id in [signed.id, unsigned.id] {
        let row = get_outgoing(&fx.pool, id).await.unwrap();
        assert_eq!(row.status, OutgoingStatus::Delivered);
        assert_eq!(row.attempts, 1);
    }
}

#[tokio::test]
async fn server_errors_open_the_circuit_and_defer_the_rest() {
    let config = OutgoingConfig {
        circuit: CircuitPolicy {
            failure_threshold: 2,
            cooldown_secs: 30,
        },
        ..OutgoingConfig::default()
    };
    let fx = dispatch_fixture(config, FakeDeliverer::always(Ok(500))).await;
    let ids = enqueue_many(&fx.pool, 3).await;
    fx.clock.set(start_time() + ChronoDuration::seconds(1));

    let summary = fx.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            leased: 3,
            retried: 2,
            deferred: 1,
            ..BatchSummary::default()
        }
    );
    assert_eq!(fx.deliverer.sent().len(), 2);
    assert_eq!(fx.dispatcher.breaker().snapshot(ENDPOINT).status, CircuitStatus::Open);

    let deferred = get_outgoing(&fx.pool, ids[2]).await.unwrap();
    assert_eq!(deferred.status, OutgoingStatus::Pending);
    assert_eq!(deferred.attempts, 0);
    assert_eq!(
        deferred.next_attempt_at.as_deref(),
        Some(format_utc(fx.clock.now() + ChronoDuration::seconds(30)).as_str())
    );

    let retried = get_outgoing(&fx.pool, ids[0]).await.unwrap();
    assert_eq!(retried.attempts, 1);
    assert_eq!(retried.last_status_code, Some(500));
    assert_eq!(retried.last_error.as_deref(), Some("unexpected status 500"));
}

#[tokio::test]
async fn client_rejection_is_terminal_and_leaves_circuit_alone() {
    let fx = dispatch_fixture(OutgoingConfig::default(), FakeDeliverer::always(Ok(404))).await;
    let ids = enqueue_many(&fx.pool, 1).await;

    let summary = fx.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.dead, 1);

    let row = get_outgoing(&fx.pool, ids[0]).await.unwrap();
    assert_eq!(row.status, OutgoingStatus::Dead);
    assert_eq!(row.last_status_code, Some(404));
    let snapshot = fx.dispatcher.breaker().snapshot(ENDPOINT);
    assert_eq!(snapshot.status, CircuitStatus::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test]
async fn throttling_and_transport_errors_are_retried() {
    let deliverer =
        FakeDeliverer::always(Err(DeliveryError::Timeout("deadline elapsed".to_string())));
    deliverer.results.lock().unwrap().push_back(Ok(429));
    let fx = dispatch_fixture(OutgoingConfig::default(), deliverer).await;
    let ids = enqueue_many(&fx.pool, 2).await;

    let summary = fx.dispatcher.dispatch_batch().await.unwrap();
    assert_eq!(summary.retried, 2);

    let throttled = get_outgoing(&fx.pool, ids[0]).await.unwrap();
    assert_eq!(throttled.last_status_code, Some(429));
    let timed_out = get_outgoing(&fx.pool, ids[1]).await.unwrap();
    assert!(timed_out.last_status_code.is_none());
    assert_eq!(
        timed_out.last_error.as_deref(),
        Some("request timed out: deadline elapsed")
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Forwarding executor
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn forwarding_executor_enqueues_the_inbound_payload() {
    let db = setup_db().await;
    let clock: Arc<dyn Clock> = manual_clock();
    let (event, _) = find_or_create(
        &db.pool,
        &NewEvent {
            provider: "acme".to_string(),
            external_id: "evt_1".to_string(),
            event_type: "order.created".to_string(),
            payload: r#"{"id":"evt_1","type":"order.created"}"#.to_string(),
            headers: Headers::new(),
        },
        start_time(),
    )
    .await
    .unwrap();

    let mut executor = ForwardingExecutor::new(db.pool.clone(), clock);
    executor.add_target(
        "forward",
        ForwardTarget {
            url: ENDPOINT.to_string(),
            secret: Some("shh".to_string()),
        },
    );

    assert_eq!(executor.execute("forward", event.id, 1).await, ActionOutcome::Success);
    assert!(matches!(
        executor.execute("missing", event.id, 1).await,
        ActionOutcome::FatalFailure(_)
    ));
    assert!(matches!(
        executor.execute("forward", Uuid::new_v4(), 1).await,
        ActionOutcome::FatalFailure(_)
    ));

    let leased = lease_outgoing(&db.pool, "w1", 10, 30_000, start_time()).await.unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].event.endpoint_url, ENDPOINT);
    assert_eq!(leased[0].event.event_type, "order.created");
    assert_eq!(leased[0].event.payload, event.payload);
    assert_eq!(leased[0].signing_secret.as_deref(), Some("shh"));
}
