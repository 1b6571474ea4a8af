//! Provider signature verification strategies.
//!
//! Each provider is bound to one [`ProviderVerifier`] through an explicit
//! [`VerifierKind`] (or a custom implementation registered on the provider
//! directory). Verifiers never error: malformed input is a failed
//! verification.

mod hmac_sha256;
mod square;
mod stripe;
mod unsigned;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::crypto::Headers;
use crate::time_window::TimeWindowValidator;

pub use hmac_sha256::HmacSha256Verifier;
pub use square::SquareVerifier;
pub use stripe::StripeVerifier;
pub use unsigned::UnsignedVerifier;

pub trait ProviderVerifier: Send + Sync {
    /// `tolerance_secs` of `None` disables timestamp validation.
    fn verify_signature(
        &self,
        payload: &str,
        headers: &Headers,
        secret: Option<&str>,
        tolerance_secs: Option<u64>,
    ) -> bool;

    fn extract_event_id(&self, payload: &Value) -> Option<String>;

    fn extract_event_type(&self, payload: &Value) -> Option<String>;

    fn extract_timestamp(&self, headers: &Headers) -> Option<i64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifierKind {
    Stripe,
    Square,
    HmacSha256,
    Unsigned,
}

#[derive(Debug, Clone, Default)]
pub struct VerifierOptions {
    pub provider: String,
    pub signature_header: Option<String>,
    pub notification_url: Option<String>,
}

pub fn build_verifier(
    kind: VerifierKind,
    options: VerifierOptions,
    window: TimeWindowValidator,
) -> Arc<dyn ProviderVerifier> {
    match kind {
        VerifierKind::Stripe => Arc::new(StripeVerifier::new(options.signature_header, window)),
        VerifierKind::Square => Arc::new(SquareVerifier::new(
            options.provider,
            options.signature_header,
            options.notification_url,
        )),
        VerifierKind::HmacSha256 => {
            Arc::new(HmacSha256Verifier::new(options.signature_header, window))
        }
        VerifierKind::Unsigned => Arc::new(UnsignedVerifier::new(options.provider)),
    }
}

/// First string (or number) value found under any of `keys`.
pub(crate) fn string_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::String(value) if !value.is_empty() => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    })
}

pub(crate) fn non_empty(secret: Option<&str>) -> Option<&str> {
    secret.filter(|secret| !secret.trim().is_empty())
}
