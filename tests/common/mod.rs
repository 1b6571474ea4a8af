#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hookrelay::{
    actions::{ActionLookup, ActionRegistry},
    clock::{Clock, ManualClock},
    crypto::{HmacEncoding, generate_hmac},
    executions::{ActionExecutor, ActionJob, ActionOutcome, ActionRunner, JobScheduler},
    ingest::{IngestService, ProviderConfig, ProviderDirectory},
    rate_limiter::RateLimiter,
    time_window::TimeWindowValidator,
    verifiers::StripeVerifier,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub struct TestDb {
    pub pool: sqlx::SqlitePool,
    _db_file: NamedTempFile,
}

pub async fn setup_db() -> TestDb {
    setup_db_with(1).await
}

pub async fn setup_db_with(max_connections: u32) -> TestDb {
    let db_file = NamedTempFile::new().expect("create temp sqlite file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(std::time::Duration::from_secs(5));

    let mut conn = sqlx::SqliteConnection::connect_with(&options)
        .await
        .expect("connect sqlite");

    let mut entries: Vec<_> = fs::read_dir("migrations")
        .expect("read migrations dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("sql"))
        .collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let contents = fs::read_to_string(entry.path()).expect("read migration");
        for stmt in contents.split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt)
                    .execute(&mut conn)
                    .await
                    .expect("run migration");
            }
        }
    }

    use sqlx::Connection;
    conn.close().await.expect("close migration conn");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .expect("connect pool");

    TestDb {
        pool,
        _db_file: db_file,
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

/// Value for a `Stripe-Signature` style header.
pub fn timestamped_signature(secret: &str, timestamp: i64, payload: &str) -> String {
    let signature = generate_hmac(
        secret.as_bytes(),
        format!("{timestamp}.{payload}").as_bytes(),
        HmacEncoding::Hex,
    );
    format!("t={timestamp},v1={signature}")
}

/// Collects scheduled jobs instead of running them.
#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<(ActionJob, Duration)>>,
}

impl RecordingScheduler {
    pub fn take(&self) -> Vec<(ActionJob, Duration)> {
        std::mem::take(&mut *self.jobs.lock().unwrap())
    }
}

impl JobScheduler for RecordingScheduler {
    fn schedule(&self, job: ActionJob, delay: Duration) {
        self.jobs.lock().unwrap().push((job, delay));
    }
}

/// Returns queued outcomes in order, then `Success`.
#[derive(Default)]
pub struct ScriptedExecutor {
    outcomes: Mutex<VecDeque<ActionOutcome>>,
    calls: Mutex<Vec<(String, Uuid, i64)>>,
}

impl ScriptedExecutor {
    pub fn with_outcomes(outcomes: impl IntoIterator<Item = ActionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Uuid, i64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for ScriptedExecutor {
    async fn execute(&self, action_id: &str, event_id: Uuid, attempt: i64) -> ActionOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((action_id.to_string(), event_id, attempt));
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ActionOutcome::Success)
    }
}

pub struct Harness {
    pub db: TestDb,
    pub clock: Arc<ManualClock>,
    pub registry: Arc<ActionRegistry>,
    pub scheduler: Arc<RecordingScheduler>,
    pub executor: Arc<ScriptedExecutor>,
    pub runner: Arc<ActionRunner>,
    pub service: Arc<IngestService>,
}

/// Ingest service with one provider "acme" (token "tok", timestamp-embedded
/// HMAC keyed by "s3cr3t") and whatever actions `registry` declares.
pub async fn harness(
    registry: ActionRegistry,
    executor: ScriptedExecutor,
    provider: Option<ProviderConfig>,
) -> Harness {
    let db = setup_db_with(4).await;
    let clock = manual_clock();
    let dyn_clock: Arc<dyn Clock> = clock.clone();

    let registry = Arc::new(registry);
    let scheduler = Arc::new(RecordingScheduler::default());
    let executor = Arc::new(executor);
    let runner = Arc::new(
        ActionRunner::new(
            db.pool.clone(),
            executor.clone(),
            scheduler.clone(),
            dyn_clock.clone(),
        )
        .with_worker_id("test-worker"),
    );

    let provider =
        provider.unwrap_or_else(|| ProviderConfig::new("acme", "tok").with_secret("s3cr3t"));
    let directory = ProviderDirectory::new().with_verifier(
        provider,
        Arc::new(StripeVerifier::new(
            None,
            TimeWindowValidator::new(dyn_clock.clone()),
        )),
    );

    let service = Arc::new(IngestService::new(
        db.pool.clone(),
        Arc::new(directory),
        Arc::new(RateLimiter::new(dyn_clock.clone())),
        ActionLookup::new(db.pool.clone(), registry.clone()),
        runner.clone(),
        dyn_clock,
    ));

    Harness {
        db,
        clock,
        registry,
        scheduler,
        executor,
        runner,
        service,
    }
}
