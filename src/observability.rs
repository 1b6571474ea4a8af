//! Named signals for the external metrics/logging collaborator.
//!
//! Signals are emitted as structured `tracing` events carrying a `signal`
//! field. They only ever contain identifiers: no secrets, no signature values.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum Signal<'a> {
    EventReceived {
        provider: &'a str,
        external_id: &'a str,
        event_type: &'a str,
        event_id: Uuid,
    },
    VerificationFailed {
        provider: &'a str,
        reason: &'a str,
    },
    VerificationSkipped {
        provider: &'a str,
    },
    RateLimitExceeded {
        provider: &'a str,
        limit: u32,
        period_secs: u64,
    },
    ActionStarted {
        action_id: &'a str,
        event_id: Uuid,
        attempt: i64,
    },
    ActionCompleted {
        action_id: &'a str,
        event_id: Uuid,
        attempt: i64,
    },
    ActionFailed {
        action_id: &'a str,
        event_id: Uuid,
        attempt: i64,
        error: &'a str,
        will_retry: bool,
    },
    CircuitOpened {
        endpoint: &'a str,
        failure_count: u32,
    },
    CircuitClosed {
        endpoint: &'a str,
    },
}

impl Signal<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EventReceived { .. } => "event.received",
            Self::VerificationFailed { .. } => "verification.failed",
            Self::VerificationSkipped { .. } => "verification.skipped",
            Self::RateLimitExceeded { .. } => "rate_limit.exceeded",
            Self::ActionStarted { .. } => "action.started",
            Self::ActionCompleted { .. } => "action.completed",
            Self::ActionFailed { .. } => "action.failed",
            Self::CircuitOpened { .. } => "circuit.opened",
            Self::CircuitClosed { .. } => "circuit.closed",
        }
    }

    pub fn emit(&self) {
        let signal = self.name();
        match *self {
            Self::EventReceived {
                provider,
                external_id,
                event_type,
                event_id,
            } => tracing::info!(
                signal,
                provider,
                external_id,
                event_type,
                %event_id,
                "webhook received"
            ),
            Self::VerificationFailed { provider, reason } => {
                tracing::warn!(signal, provider, reason, "webhook verification failed");
            }
            Self::VerificationSkipped { provider } => tracing::warn!(
                signal,
                provider,
                "no signing secret configured; signature verification is DISABLED"
            ),
            Self::RateLimitExceeded {
                provider,
                limit,
                period_secs,
            } => tracing::warn!(signal, provider, limit, period_secs, "rate limit exceeded"),
            Self::ActionStarted {
                action_id,
                event_id,
                attempt,
            } => tracing::info!(signal, action_id, %event_id, attempt, "action started"),
            Self::ActionCompleted {
                action_id,
                event_id,
                attempt,
            } => tracing::info!(signal, action_id, %event_id, attempt, "action completed"),
            Self::ActionFailed {
                action_id,
                event_id,
                attempt,
                error,
                will_retry,
            } => tracing::warn!(
                signal,
                action_id,
                %event_id,
                attempt,
                error,
                will_retry,
                "action failed"
            ),
            Self::CircuitOpened {
                endpoint,
                failure_count,
            } => tracing::warn!(signal, endpoint, failure_count, "circuit opened"),
            Self::CircuitClosed { endpoint } => tracing::info!(signal, endpoint, "circuit closed"),
        }
    }
}
