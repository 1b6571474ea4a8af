use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::actions::{ActionConfig, ActionLookup};
use crate::clock::Clock;
use crate::crypto::{Headers, secure_compare};
use crate::db::StoreError;
use crate::events::{NewEvent, find_or_create, get_event, mark_replayed, recompute_status};
use crate::executions::{
    ActionJob, ActionRunner, ClaimError, create_pending, list_for_event, reset_for_replay,
};
use crate::observability::Signal;
use crate::rate_limiter::{RateLimitExceeded, RateLimiter};
use crate::types::{
    ActionExecution, DedupState, ExecutionStatus, IncomingEvent, IngestResponse, IngestStatus,
};

use super::provider::ProviderDirectory;

const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// Why a webhook was refused. Every variant is an expected outcome, not a
/// fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    UnknownProvider,
    InvalidToken,
    Inactive,
    PayloadTooLarge { size: usize, limit: usize },
    RateLimited(RateLimitExceeded),
    InvalidSignature,
    MalformedPayload(String),
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::UnknownProvider => "unknown_provider",
            Self::InvalidToken => "invalid_token",
            Self::Inactive => "provider_inactive",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::RateLimited(_) => "rate_limited",
            Self::InvalidSignature => "invalid_signature",
            Self::MalformedPayload(_) => "malformed_payload",
        }
    }
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Accepted {
        event: IncomingEvent,
        dispatched: usize,
    },
    Duplicate {
        event: IncomingEvent,
    },
    Rejected(Rejection),
}

impl IngestOutcome {
    pub fn response(&self) -> IngestResponse {
        match self {
            Self::Accepted { event, .. } => IngestResponse {
                status: IngestStatus::Accepted,
                event_id: Some(event.id),
                dedup_state: Some(DedupState::Unique),
                reason: None,
            },
            Self::Duplicate { event } => IngestResponse {
                status: IngestStatus::Duplicate,
                event_id: Some(event.id),
                dedup_state: Some(DedupState::Duplicate),
                reason: None,
            },
            Self::Rejected(rejection) => IngestResponse {
                status: IngestStatus::Rejected,
                event_id: None,
                dedup_state: None,
                reason: Some(rejection.reason().to_string()),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub event: IncomingEvent,
    pub actions: Vec<ActionExecution>,
}

pub struct IngestService {
    pool: SqlitePool,
    providers: Arc<ProviderDirectory>,
    rate_limiter: Arc<RateLimiter>,
    lookup: ActionLookup,
    runner: Arc<ActionRunner>,
    clock: Arc<dyn Clock>,
}

impl IngestService {
    pub fn new(
        pool: SqlitePool,
        providers: Arc<ProviderDirectory>,
        rate_limiter: Arc<RateLimiter>,
        lookup: ActionLookup,
        runner: Arc<ActionRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            providers,
            rate_limiter,
            lookup,
            runner,
            clock,
        }
    }

    pub fn providers(&self) -> &ProviderDirectory {
        &self.providers
    }

    /// Handles one inbound webhook. `raw_body` must be the exact bytes the
    /// provider signed.
    pub async fn ingest(
        &self,
        provider: &str,
        token: &str,
        raw_body: &str,
        headers: &Headers,
    ) -> Result<IngestOutcome, StoreError> {
        let Some(registered) = self.providers.get(provider) else {
            return Ok(IngestOutcome::Rejected(Rejection::UnknownProvider));
        };
        let config = &registered.config;

        if !secure_compare(config.token.as_bytes(), token.as_bytes()) {
            Signal::VerificationFailed {
                provider,
                reason: "invalid_token",
            }
            .emit();
            return Ok(IngestOutcome::Rejected(Rejection::InvalidToken));
        }
        if !config.active {
            tracing::info!(provider, "webhook for inactive provider refused");
            return Ok(IngestOutcome::Rejected(Rejection::Inactive));
        }
        if raw_body.len() > config.max_payload_size_bytes {
            return Ok(IngestOutcome::Rejected(Rejection::PayloadTooLarge {
                size: raw_body.len(),
                limit: config.max_payload_size_bytes,
            }));
        }

        if let Some(limit) = config.rate_limit
            && let Err(exceeded) =
                self.rate_limiter
                    .record(provider, limit.requests, limit.period_secs)
        {
            Signal::RateLimitExceeded {
                provider,
                limit: limit.requests,
                period_secs: limit.period_secs,
            }
            .emit();
            return Ok(IngestOutcome::Rejected(Rejection::RateLimited(exceeded)));
        }

        let verified = registered.verifier.verify_signature(
            raw_body,
            headers,
            config.signing_secret.as_deref(),
            config.tolerance(),
        );
        if !verified {
            Signal::VerificationFailed {
                provider,
                reason: "invalid_signature",
            }
            .emit();
            return Ok(IngestOutcome::Rejected(Rejection::InvalidSignature));
        }

        let payload: Value = match serde_json::from_str(raw_body) {
            Ok(payload) => payload,
            Err(err) => {
                return Ok(IngestOutcome::Rejected(Rejection::MalformedPayload(
                    err.to_string(),
                )));
            }
        };

        let external_id = match registered.verifier.extract_event_id(&payload) {
            Some(id) => id,
            None => {
                let generated = Uuid::new_v4().to_string();
                tracing::warn!(
                    provider,
                    external_id = %generated,
                    "webhook has no event id; stored without deduplication"
                );
                generated
            }
        };
        let event_type = registered
            .verifier
            .extract_event_type(&payload)
            .unwrap_or_else(|| UNKNOWN_EVENT_TYPE.to_string());

        let new_event = NewEvent {
            provider: provider.to_string(),
            external_id,
            event_type,
            payload: raw_body.to_string(),
            headers: headers.clone(),
        };
        let (event, dedup_state) = find_or_create(&self.pool, &new_event, self.clock.now()).await?;

        if dedup_state == DedupState::Duplicate {
            tracing::info!(
                provider,
                external_id = %event.external_id,
                event_id = %event.id,
                "duplicate webhook"
            );
            return Ok(IngestOutcome::Duplicate { event });
        }

        Signal::EventReceived {
            provider,
            external_id: &event.external_id,
            event_type: &event.event_type,
            event_id: event.id,
        }
        .emit();

        let dispatched = self.dispatch(&event).await?;
        let event = get_event(&self.pool, event.id).await?;
        Ok(IngestOutcome::Accepted { event, dispatched })
    }

    /// Operator redelivery: tags the event replayed, resets its currently
    /// configured actions to a fresh pending state and dispatches them again.
    ///
    /// The tag and every reset commit together, and only then are jobs
    /// handed off. While any execution of the event is still processing
    /// nothing is changed and the replay is refused.
    pub async fn replay(&self, event_id: Uuid) -> Result<ReplayResult, StoreError> {
        let event = get_event(&self.pool, event_id).await?;
        let actions = self
            .lookup
            .actions_for(&event.provider, &event.event_type)
            .await?;
        let now = self.clock.now();

        let mut tx = self.pool.begin().await?;
        if let Some(busy) = list_for_event(&mut *tx, event_id)
            .await?
            .into_iter()
            .find(|record| record.status == ExecutionStatus::Processing)
        {
            tracing::info!(
                %event_id,
                action_id = %busy.action_id,
                "replay refused; action in flight"
            );
            return Err(StoreError::Conflict(format!(
                "execution_in_flight: {}",
                busy.action_id
            )));
        }
        let event = mark_replayed(&mut *tx, event_id, now).await?;

        let mut jobs = Vec::with_capacity(actions.len());
        for action in &actions {
            let mut record = create_pending(&mut *tx, event_id, &action.action_id, now).await?;
            if record.status != ExecutionStatus::Pending || record.attempt_count > 0 {
                reset_for_replay(&mut *tx, &mut record, now)
                    .await
                    .map_err(|err| match err {
                        ClaimError::Store(err) => err,
                        other => StoreError::Conflict(other.to_string()),
                    })?;
            }
            jobs.push(job_for(&event, action, &record));
        }
        tx.commit().await?;
        tracing::info!(
            %event_id,
            provider = %event.provider,
            actions = jobs.len(),
            "replaying event"
        );

        self.run(event_id, jobs).await?;

        Ok(ReplayResult {
            event: get_event(&self.pool, event_id).await?,
            actions: list_for_event(&self.pool, event_id).await?,
        })
    }

    /// Creates one pending execution per selected action, then runs them.
    async fn dispatch(&self, event: &IncomingEvent) -> Result<usize, StoreError> {
        let actions = self
            .lookup
            .actions_for(&event.provider, &event.event_type)
            .await?;

        let mut jobs = Vec::with_capacity(actions.len());
        for action in &actions {
            let record =
                create_pending(&self.pool, event.id, &action.action_id, self.clock.now()).await?;
            jobs.push(job_for(event, action, &record));
        }
        self.run(event.id, jobs).await?;
        Ok(actions.len())
    }

    /// Async jobs go to the scheduler, the rest run inline in priority order.
    async fn run(&self, event_id: Uuid, jobs: Vec<ActionJob>) -> Result<(), StoreError> {
        for job in jobs {
            if job.policy.run_async {
                self.runner.scheduler().schedule(job, Duration::ZERO);
            } else {
                let result = self.runner.perform(&job).await?;
                tracing::debug!(
                    action_id = %job.action_id,
                    %event_id,
                    ?result,
                    "inline action finished"
                );
            }
        }

        recompute_status(&self.pool, event_id, self.clock.now()).await?;
        Ok(())
    }
}

fn job_for(event: &IncomingEvent, action: &ActionConfig, record: &ActionExecution) -> ActionJob {
    ActionJob {
        execution_id: record.id,
        event_id: event.id,
        action_id: action.action_id.clone(),
        policy: action.policy.clone(),
    }
}
