use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::crypto::{HmacEncoding, generate_hmac};
use crate::db::StoreError;
use crate::types::OutgoingStatus;

use super::OutgoingConfig;
use super::store::{
    DeliveryReport, LeasedOutgoing, ReportOutcome, defer_outgoing, lease_outgoing,
    report_outgoing,
};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const EVENT_ID_HEADER: &str = "X-Webhook-Id";
pub const EVENT_TYPE_HEADER: &str = "X-Webhook-Event";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone)]
pub struct DeliveryRequest<'a> {
    pub endpoint_url: &'a str,
    pub event_id: Uuid,
    pub event_type: &'a str,
    pub payload: &'a str,
    /// Full `X-Webhook-Signature` value, when the row has a secret.
    pub signature: Option<String>,
}

/// Sends one signed payload and reports the HTTP status it got back.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, request: &DeliveryRequest<'_>) -> Result<u16, DeliveryError>;
}

/// `t=<unix>,v1=<hex HMAC-SHA256 of "{t}.{body}">`, the same shape the
/// timestamp-embedded verifier accepts.
pub fn sign_payload(secret: &str, timestamp: i64, body: &str) -> String {
    let signed = format!("{timestamp}.{body}");
    let signature = generate_hmac(secret.as_bytes(), signed.as_bytes(), HmacEncoding::Hex);
    format!("t={timestamp},v1={signature}")
}

pub struct HttpDeliverer {
    client: reqwest::Client,
}

impl HttpDeliverer {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hookrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| DeliveryError::Transport(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    async fn deliver(&self, request: &DeliveryRequest<'_>) -> Result<u16, DeliveryError> {
        let mut builder = self
            .client
            .post(request.endpoint_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_ID_HEADER, request.event_id.to_string())
            .header(EVENT_TYPE_HEADER, request.event_type)
            .body(request.payload.to_string());
        if let Some(signature) = &request.signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                DeliveryError::Timeout(err.to_string())
            } else {
                DeliveryError::Transport(err.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub leased: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dead: usize,
    pub deferred: usize,
}

/// Result classes for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptClass {
    Success,
    /// Worth retrying and counts against the endpoint's health.
    Retryable,
    /// The endpoint answered and refused the payload for good.
    Rejected,
}

fn classify(result: &Result<u16, DeliveryError>) -> AttemptClass {
    match result {
        Ok(code) if (200..300).contains(code) => AttemptClass::Success,
        Ok(408 | 429) => AttemptClass::Retryable,
        Ok(code) if (400..500).contains(code) => AttemptClass::Rejected,
        Ok(_) | Err(_) => AttemptClass::Retryable,
    }
}

pub struct OutgoingDispatcher {
    pool: SqlitePool,
    config: OutgoingConfig,
    breaker: Arc<CircuitBreaker>,
    deliverer: Arc<dyn Deliverer>,
    clock: Arc<dyn Clock>,
    worker_id: String,
}

impl OutgoingDispatcher {
    pub fn new(
        pool: SqlitePool,
        config: OutgoingConfig,
        breaker: Arc<CircuitBreaker>,
        deliverer: Arc<dyn Deliverer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            config,
            breaker,
            deliverer,
            clock,
            worker_id: format!("hookrelay-outgoing-{}", Uuid::new_v4()),
        }
    }

    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Leases one batch of due rows and attempts each of them once.
    pub async fn dispatch_batch(&self) -> Result<BatchSummary, StoreError> {
        let leased = lease_outgoing(
            &self.pool,
            &self.worker_id,
            self.config.batch_size,
            self.config.lease_ms,
            self.clock.now(),
        )
        .await?;

        let mut summary = BatchSummary {
            leased: leased.len(),
            ..BatchSummary::default()
        };
        for item in &leased {
            match self.attempt(item).await {
                Ok(Some(outcome)) => match outcome {
                    ReportOutcome::Delivered => summary.delivered += 1,
                    ReportOutcome::Retry => summary.retried += 1,
                    ReportOutcome::Dead => summary.dead += 1,
                },
                Ok(None) => summary.deferred += 1,
                Err(StoreError::Conflict(reason)) => {
                    tracing::warn!(outgoing_id = %item.event.id, reason, "lost outgoing lease");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(summary)
    }

    /// `None` when the circuit kept the request from being sent.
    async fn attempt(&self, item: &LeasedOutgoing) -> Result<Option<ReportOutcome>, StoreError> {
        let event = &item.event;
        let endpoint = event.endpoint_url.as_str();

        if let Err(open) = self.breaker.check(endpoint, self.config.circuit) {
            tracing::debug!(
                outgoing_id = %event.id,
                endpoint,
                retry_after = ?open.retry_after,
                "circuit open; deferring"
            );
            defer_outgoing(
                &self.pool,
                event.id,
                &self.worker_id,
                open.retry_after,
                self.clock.now(),
            )
            .await?;
            return Ok(None);
        }

        let signature = item
            .signing_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| sign_payload(secret, self.clock.now().timestamp(), &event.payload));
        let request = DeliveryRequest {
            endpoint_url: endpoint,
            event_id: event.id,
            event_type: &event.event_type,
            payload: &event.payload,
            signature,
        };
        let result = self.deliverer.deliver(&request).await;

        let (outcome, error) = match classify(&result) {
            AttemptClass::Success => {
                self.breaker.record_success(endpoint);
                (ReportOutcome::Delivered, None)
            }
            AttemptClass::Retryable => {
                self.breaker.record_failure(endpoint, self.config.circuit);
                (ReportOutcome::Retry, Some(describe(&result)))
            }
            AttemptClass::Rejected => (ReportOutcome::Dead, Some(describe(&result))),
        };

        let report = DeliveryReport {
            outcome,
            status_code: result.as_ref().ok().copied(),
            error,
        };
        let status = report_outgoing(
            &self.pool,
            &self.config,
            event.id,
            &self.worker_id,
            &report,
            self.clock.now(),
        )
        .await?;
        tracing::info!(
            outgoing_id = %event.id,
            endpoint,
            status = status.as_str(),
            "outgoing attempt finished"
        );

        Ok(Some(match status {
            OutgoingStatus::Delivered => ReportOutcome::Delivered,
            OutgoingStatus::Dead => ReportOutcome::Dead,
            OutgoingStatus::Pending | OutgoingStatus::InFlight => ReportOutcome::Retry,
        }))
    }
}

fn describe(result: &Result<u16, DeliveryError>) -> String {
    match result {
        Ok(code) => format!("unexpected status {code}"),
        Err(err) => err.to_string(),
    }
}

/// Polls the queue until the process exits. Sleeps only when a batch comes
/// back empty.
pub fn spawn_outgoing_loop(
    dispatcher: Arc<OutgoingDispatcher>,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match dispatcher.dispatch_batch().await {
                Ok(summary) if summary.leased > 0 => {
                    tracing::debug!(?summary, "outgoing batch dispatched");
                    continue;
                }
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "outgoing dispatch failed"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    })
}
