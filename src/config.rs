//! Process configuration: environment settings and the provider document.
//!
//! This is the only layer that reads the environment or the filesystem.
//! Everything it hands to the core carries already-resolved secrets.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::actions::{ActionPolicy, ActionRegistry};
use crate::ingest::{
    DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_TOLERANCE_SECS, ProviderConfig, ProviderDirectory,
    RateLimitPolicy,
};
use crate::outgoing::ForwardTarget;
use crate::time_window::TimeWindowValidator;
use crate::verifiers::{VerifierKind, VerifierOptions, build_verifier};

const DEFAULT_RATE_PERIOD_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid provider document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("environment variable {0} referenced by ENV[...] is not set")]
    MissingEnv(String),
    #[error("invalid provider configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub admin_api_token: Option<String>,
    pub providers_file: PathBuf,
    pub job_concurrency: usize,
    pub lock_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("DATABASE_URL")
            && !value.trim().is_empty()
        {
            config.database_url = value;
        }
        if let Ok(value) = std::env::var("HOOKRELAY_BIND_ADDR")
            && !value.trim().is_empty()
        {
            config.bind_addr = value;
        }
        if let Ok(value) = std::env::var("HOOKRELAY_ADMIN_API_TOKEN") {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                config.admin_api_token = Some(trimmed.to_string());
            }
        }
        if let Ok(value) = std::env::var("HOOKRELAY_PROVIDERS_FILE")
            && !value.trim().is_empty()
        {
            config.providers_file = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("HOOKRELAY_JOB_CONCURRENCY")
            && let Ok(parsed) = value.parse::<usize>()
        {
            config.job_concurrency = parsed.max(1);
        }
        if let Ok(value) = std::env::var("HOOKRELAY_LOCK_TIMEOUT_SECS")
            && let Ok(parsed) = value.parse::<u64>()
        {
            config.lock_timeout_secs = parsed.max(1);
        }

        config
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:hookrelay.db".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
            admin_api_token: None,
            providers_file: PathBuf::from("providers.json"),
            job_concurrency: 8,
            lock_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersDocument {
    #[serde(default)]
    pub providers: Vec<ProviderDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderDefinition {
    pub name: String,
    pub kind: VerifierKind,
    pub token: String,
    #[serde(default)]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub notification_url: Option<String>,
    #[serde(default)]
    pub signature_header: Option<String>,
    #[serde(default = "default_tolerance")]
    pub timestamp_tolerance_secs: u64,
    #[serde(default = "default_true")]
    pub timestamp_validation: bool,
    #[serde(default)]
    pub rate_limit_requests: Option<u32>,
    #[serde(default = "default_rate_period")]
    pub rate_limit_period_secs: u64,
    #[serde(default = "default_max_payload")]
    pub max_payload_size_bytes: usize,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub actions: Vec<ActionDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActionDeclaration {
    pub event_type: String,
    #[serde(alias = "id")]
    pub action_id: String,
    #[serde(flatten)]
    pub policy: ActionPolicy,
    #[serde(default)]
    pub forward_to: Option<ForwardDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardDeclaration {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_tolerance() -> u64 {
    DEFAULT_TOLERANCE_SECS
}

fn default_true() -> bool {
    true
}

fn default_rate_period() -> u64 {
    DEFAULT_RATE_PERIOD_SECS
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

/// Everything the provider document configures, ready to hand to the core.
#[derive(Default)]
pub struct ProviderSetup {
    pub directory: ProviderDirectory,
    pub registry: ActionRegistry,
    /// `(action_id, target)` for every declared forwarding action.
    pub forward_targets: Vec<(String, ForwardTarget)>,
}

/// Resolves `ENV[NAME]` to the value of `NAME`; anything else is returned
/// as-is.
pub fn resolve_secret(value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    match trimmed
        .strip_prefix("ENV[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        Some(name) => {
            std::env::var(name.trim()).map_err(|_| ConfigError::MissingEnv(name.trim().to_string()))
        }
        None => Ok(trimmed.to_string()),
    }
}

pub fn parse_providers(json: &str) -> Result<ProvidersDocument, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

/// Reads the provider document. A missing file means no providers.
pub fn load_providers(path: &Path) -> Result<ProvidersDocument, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_providers(&contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                path = %path.display(),
                "providers file not found; no providers configured"
            );
            Ok(ProvidersDocument {
                providers: Vec::new(),
            })
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Validates the document, resolves secrets and builds the provider
/// directory, the declared action registry and the forwarding routes.
pub fn assemble(
    document: ProvidersDocument,
    window: &TimeWindowValidator,
) -> Result<ProviderSetup, ConfigError> {
    let mut setup = ProviderSetup::default();
    let mut seen = HashSet::new();

    for definition in document.providers {
        let name = definition.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::Invalid("provider name is empty".to_string()));
        }
        if !seen.insert(name.clone()) {
            return Err(ConfigError::Invalid(format!("duplicate provider {name}")));
        }
        let token = resolve_secret(&definition.token)?;
        if token.is_empty() {
            return Err(ConfigError::Invalid(format!("provider {name} has an empty token")));
        }
        let signing_secret = definition
            .signing_secret
            .as_deref()
            .map(resolve_secret)
            .transpose()?
            .filter(|secret| !secret.is_empty());
        if definition.kind == VerifierKind::Square && definition.notification_url.is_none() {
            return Err(ConfigError::Invalid(format!(
                "provider {name} needs notification_url"
            )));
        }

        let rate_limit = definition.rate_limit_requests.map(|requests| RateLimitPolicy {
            requests,
            period_secs: definition.rate_limit_period_secs.max(1),
        });
        let config = ProviderConfig {
            name: name.clone(),
            token,
            signing_secret,
            timestamp_tolerance_secs: definition.timestamp_tolerance_secs,
            timestamp_validation: definition.timestamp_validation,
            rate_limit,
            max_payload_size_bytes: definition.max_payload_size_bytes,
            active: definition.active,
        };
        let verifier = build_verifier(
            definition.kind,
            VerifierOptions {
                provider: name.clone(),
                signature_header: definition.signature_header,
                notification_url: definition.notification_url,
            },
            window.clone(),
        );
        setup.directory.insert(config, verifier);

        for action in definition.actions {
            if let Some(forward) = &action.forward_to {
                let secret = forward
                    .secret
                    .as_deref()
                    .map(resolve_secret)
                    .transpose()?
                    .filter(|secret| !secret.is_empty());
                setup.forward_targets.push((
                    action.action_id.clone(),
                    ForwardTarget {
                        url: forward.url.clone(),
                        secret,
                    },
                ));
            }
            setup
                .registry
                .register(&name, &action.event_type, &action.action_id, action.policy);
        }
    }

    Ok(setup)
}
