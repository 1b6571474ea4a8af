use serde_json::Value;

use crate::crypto::{
    Headers, HmacEncoding, extract_header, generate_hmac, parse_kv_header, secure_compare,
};
use crate::time_window::TimeWindowValidator;

use super::{ProviderVerifier, non_empty, string_field};

pub const DEFAULT_SIGNATURE_HEADER: &str = "Stripe-Signature";

/// `t=<unix>,v1=<hex>[,v1=<hex>][,v0=<hex>]` where each signature is
/// `HMAC(secret, "{t}.{payload}")`. Several signatures may be present while a
/// secret is being rotated; any one matching is enough.
pub struct StripeVerifier {
    header: String,
    window: TimeWindowValidator,
}

impl StripeVerifier {
    pub fn new(header: Option<String>, window: TimeWindowValidator) -> Self {
        Self {
            header: header.unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string()),
            window,
        }
    }
}

impl ProviderVerifier for StripeVerifier {
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
        let Some(header) = extract_header(headers, &[self.header.as_str()]) else {
            tracing::debug!(header = %self.header, "signature header missing");
            return false;
        };

        let parsed = parse_kv_header(header);
        let Some(timestamp_raw) = parsed.first("t") else {
            tracing::debug!("signature header has no timestamp");
            return false;
        };
        let Ok(timestamp) = timestamp_raw.parse::<i64>() else {
            tracing::debug!("signature timestamp is not an integer");
            return false;
        };

        let candidates: Vec<&String> = parsed.all("v1").iter().chain(parsed.all("v0")).collect();
        if candidates.is_empty() {
            tracing::debug!("signature header has no signatures");
            return false;
        }

        if let Some(tolerance) = tolerance_secs
            && let Err(err) = self.window.validate(timestamp, tolerance)
        {
            tracing::debug!(error = %err, "signature timestamp outside tolerance");
            return false;
        }

        let signed = format!("{timestamp_raw}.{payload}");
        let expected = generate_hmac(secret.as_bytes(), signed.as_bytes(), HmacEncoding::Hex);

        candidates
            .into_iter()
            .any(|candidate| secure_compare(candidate.as_bytes(), expected.as_bytes()))
    }

    fn extract_event_id(&self, payload: &Value) -> Option<String> {
        string_field(payload, &["id"])
    }

    fn extract_event_type(&self, payload: &Value) -> Option<String> {
        string_field(payload, &["type"])
    }

    fn extract_timestamp(&self, headers: &Headers) -> Option<i64> {
        let header = extract_header(headers, &[self.header.as_str()])?;
        parse_kv_header(header).first("t")?.parse().ok()
    }
}
