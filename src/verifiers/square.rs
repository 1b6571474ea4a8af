use serde_json::Value;

use crate::crypto::{Headers, HmacEncoding, extract_header, generate_hmac, secure_compare};
use crate::observability::Signal;

use super::{ProviderVerifier, non_empty, string_field};

pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Square-HmacSha256-Signature";

/// Base64 `HMAC(secret, notification_url + payload)` in a single header.
pub struct SquareVerifier {
    provider: String,
    header: String,
    notification_url: Option<String>,
}

impl SquareVerifier {
    pub fn new(provider: String, header: Option<String>, notification_url: Option<String>) -> Self {
        Self {
            provider,
            header: header.unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string()),
            notification_url,
        }
    }
}

impl ProviderVerifier for SquareVerifier {
    fn verify_signature(
        &self,
        payload: &str,
        headers: &Headers,
        secret: Option<&str>,
        _tolerance_secs: Option<u64>,
    ) -> bool {
        let Some(secret) = non_empty(secret) else {
            Signal::VerificationSkipped {
                provider: &self.provider,
            }
            .emit();
            return true;
        };
        let Some(url) = self.notification_url.as_deref() else {
            tracing::warn!(
                provider = %self.provider,
                "notification_url not configured; cannot verify"
            );
            return false;
        };
        let Some(received) = extract_header(headers, &[self.header.as_str()]) else {
            tracing::debug!(header = %self.header, "signature header missing");
            return false;
        };

        let signed = format!("{url}{payload}");
        let expected = generate_hmac(secret.as_bytes(), signed.as_bytes(), HmacEncoding::Base64);
        secure_compare(received.as_bytes(), expected.as_bytes())
    }

    fn extract_event_id(&self, payload: &Value) -> Option<String> {
        string_field(payload, &["event_id", "id"])
    }

    fn extract_event_type(&self, payload: &Value) -> Option<String> {
        string_field(payload, &["type"])
    }

    fn extract_timestamp(&self, _headers: &Headers) -> Option<i64> {
        None
    }
}
