pub mod actions;
pub mod auth;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod events;
pub mod executions;
pub mod extractors;
pub mod handlers;
pub mod ingest;
pub mod observability;
pub mod outgoing;
pub mod rate_limiter;
pub mod state;
pub mod time_window;
pub mod types;
pub mod verifiers;
