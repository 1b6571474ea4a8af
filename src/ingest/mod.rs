//! The ingestion entry point: admission, verification, dedup, dispatch.

mod provider;
mod service;

pub use provider::{
    DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_TOLERANCE_SECS, ProviderConfig, ProviderDirectory,
    RateLimitPolicy, RegisteredProvider,
};
pub use service::{IngestOutcome, IngestService, Rejection, ReplayResult};
