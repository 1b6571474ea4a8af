use serde_json::Value;

use crate::crypto::{Headers, HmacEncoding, extract_header, generate_hmac, secure_compare};
use crate::time_window::TimeWindowValidator;

use super::{ProviderVerifier, non_empty, string_field};

pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Hex `HMAC(secret, payload)` in one header, optionally prefixed `sha256=`.
/// When the sender also supplies a timestamp header it is checked against the
/// tolerance; the timestamp is not part of the signed content.
pub struct HmacSha256Verifier {
    header: String,
    window: TimeWindowValidator,
}

impl HmacSha256Verifier {
    pub fn new(header: Option<String>, window: TimeWindowValidator) -> Self {
        Self {
            header: header.unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string()),
            window,
        }
    }
}

impl ProviderVerifier for HmacSha256Verifier {
    fn verify_signature(
        &self,
        payload: &str,
        headers: &Headers,
        secret: Option<&str>,
        tolerance_secs: Option<u64>,
    ) -> bool {
        let Some(secret) = non_empty(secret) else {
            tracing::debug!("signing secret missing");
            return false;
        };
        let Some(received) = extract_header(headers, &[self.header.as_str()]) else {
            tracing::debug!(header = %self.header, "signature header missing");
            return false;
        };
        let received = received.strip_prefix("sha256=").unwrap_or(received);

        if let Some(tolerance) = tolerance_secs
            && let Some(raw) = extract_header(headers, &[TIMESTAMP_HEADER])
        {
            let Ok(timestamp) = raw.parse::<i64>() else {
                tracing::debug!("timestamp header is not an integer");
                return false;
            };
            if let Err(err) = self.window.validate(timestamp, tolerance) {
                tracing::debug!(error = %err, "timestamp outside tolerance");
                return false;
            }
        }

        let expected = generate_hmac(secret.as_bytes(), payload.as_bytes(), HmacEncoding::Hex);
        secure_compare(
            received.to_ascii_lowercase().as_bytes(),
            expected.as_bytes(),
        )
    }

    fn extract_event_id(&self, payload: &Value) -> Option<String> {
        string_field(payload, &["id", "event_id"])
    }

    fn extract_event_type(&self, payload: &Value) -> Option<String> {
        string_field(payload, &["type", "event_type", "event"])
    }

    fn extract_timestamp(&self, headers: &Headers) -> Option<i64> {
        extract_header(headers, &[TIMESTAMP_HEADER])?.parse().ok()
    }
}
