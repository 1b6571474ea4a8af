use std::collections::HashMap;
use std::sync::Arc;

use crate::verifiers::ProviderVerifier;

pub const DEFAULT_TOLERANCE_SECS: u64 = 300;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub requests: u32,
    pub period_secs: u64,
}

/// Runtime view of one provider. Secrets are already resolved.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub token: String,
    pub signing_secret: Option<String>,
    pub timestamp_tolerance_secs: u64,
    pub timestamp_validation: bool,
    pub rate_limit: Option<RateLimitPolicy>,
    pub max_payload_size_bytes: usize,
    pub active: bool,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            signing_secret: None,
            timestamp_tolerance_secs: DEFAULT_TOLERANCE_SECS,
            timestamp_validation: true,
            rate_limit: None,
            max_payload_size_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            active: true,
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, requests: u32, period_secs: u64) -> Self {
        self.rate_limit = Some(RateLimitPolicy {
            requests,
            period_secs,
        });
        self
    }

    /// Tolerance handed to the verifier; `None` when validation is off.
    pub fn tolerance(&self) -> Option<u64> {
        self.timestamp_validation
            .then_some(self.timestamp_tolerance_secs)
    }
}

#[derive(Clone)]
pub struct RegisteredProvider {
    pub config: ProviderConfig,
    pub verifier: Arc<dyn ProviderVerifier>,
}

/// Explicit provider name → (config, verifier) map.
#[derive(Clone, Default)]
pub struct ProviderDirectory {
    providers: HashMap<String, RegisteredProvider>,
}

impl ProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `config` with `verifier`, replacing any provider of the same
    /// name. This is also how custom verifiers are plugged in.
    #[must_use]
    pub fn with_verifier(
        mut self,
        config: ProviderConfig,
        verifier: Arc<dyn ProviderVerifier>,
    ) -> Self {
        self.insert(config, verifier);
        self
    }

    pub fn insert(&mut self, config: ProviderConfig, verifier: Arc<dyn ProviderVerifier>) {
        self.providers
            .insert(config.name.clone(), RegisteredProvider { config, verifier });
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.get(name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
