use serde_json::Value;

use crate::crypto::Headers;
use crate::observability::Signal;

use super::{ProviderVerifier, string_field};

/// Accepts every request. Only meant for test endpoints.
pub struct UnsignedVerifier {
    provider: String,
}

impl UnsignedVerifier {
    pub fn new(provider: String) -> Self {
        Self { provider }
    }
}

impl ProviderVerifier for UnsignedVerifier {
    fn verify_signature(
        &self,
        _payload: &str,
        _headers: &Headers,
        _secret: Option<&str>,
        _tolerance_secs: Option<u64>,
    ) -> bool {
        Signal::VerificationSkipped {
            provider: &self.provider,
        }
        .emit();
        true
    }

    fn extract_event_id(&self, payload: &Value) -> Option<String> {
        string_field(payload, &["id", "event_id", "uuid"])
    }

    fn extract_event_type(&self, payload: &Value) -> Option<String> {
        string_field(payload, &["type", "event_type", "event"])
    }

    fn extract_timestamp(&self, _headers: &Headers) -> Option<i64> {
        None
    }
}
