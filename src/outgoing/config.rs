use std::time::Duration;

use crate::circuit_breaker::CircuitPolicy;

#[derive(Debug, Clone)]
pub struct OutgoingConfig {
    pub max_attempts: u32,
    pub circuit: CircuitPolicy,
    pub lease_ms: i64,
    pub batch_size: i64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
}

impl OutgoingConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("HOOKRELAY_OUTGOING_MAX_ATTEMPTS")
            && let Ok(parsed) = value.parse::<u32>()
        {
            config.max_attempts = parsed.max(1);
        }
        if let Ok(value) = std::env::var("HOOKRELAY_CIRCUIT_FAILURE_THRESHOLD")
            && let Ok(parsed) = value.parse::<u32>()
        {
            config.circuit.failure_threshold = parsed.max(1);
        }
        if let Ok(value) = std::env::var("HOOKRELAY_CIRCUIT_COOLDOWN_SECS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.circuit.cooldown_secs = parsed;
        }
        if let Ok(value) = std::env::var("HOOKRELAY_OUTGOING_LEASE_MS")
            && let Ok(parsed) = value.parse::<i64>()
            && parsed > 0
        {
            config.lease_ms = parsed;
        }
        if let Ok(value) = std::env::var("HOOKRELAY_OUTGOING_BATCH")
            && let Ok(parsed) = value.parse::<i64>()
            && parsed > 0
        {
            config.batch_size = parsed;
        }
        if let Ok(value) = std::env::var("HOOKRELAY_OUTGOING_POLL_MS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.poll_interval_ms = parsed.max(10);
        }
        if let Ok(value) = std::env::var("HOOKRELAY_OUTGOING_TIMEOUT_MS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.request_timeout_ms = parsed.max(1);
        }
        if let Ok(value) = std::env::var("HOOKRELAY_OUTGOING_BACKOFF_BASE_SECS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.backoff_base_secs = parsed.max(1);
        }
        if let Ok(value) = std::env::var("HOOKRELAY_OUTGOING_BACKOFF_MAX_SECS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.backoff_max_secs = parsed.max(1);
        }

        config
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay after the `attempt_no`-th failed attempt: base doubling per
    /// attempt, capped.
    pub fn backoff_secs(&self, attempt_no: i64) -> u64 {
        let exponent = u32::try_from((attempt_no.max(1) - 1).min(31)).unwrap_or(31);
        self.backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_secs)
    }
}

impl Default for OutgoingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            circuit: CircuitPolicy::default(),
            lease_ms: 30_000,
            batch_size: 25,
            poll_interval_ms: 1_000,
            request_timeout_ms: 10_000,
            backoff_base_secs: 1,
            backoff_max_secs: 3_600,
        }
    }
}
