#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::sync::Arc;

use hookrelay::{
    clock::Clock,
    config::{ConfigError, assemble, load_providers, parse_providers, resolve_secret},
    ingest::{DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_TOLERANCE_SECS, RateLimitPolicy},
    outgoing::ForwardTarget,
    time_window::TimeWindowValidator,
};

use common::manual_clock;

fn window() -> TimeWindowValidator {
    let clock: Arc<dyn Clock> = manual_clock();
    TimeWindowValidator::new(clock)
}

fn invalid_reason(json: &str) -> String {
    let document = parse_providers(json).unwrap();
    match assemble(document, &window()).err() {
        Some(ConfigError::Invalid(reason)) => reason,
        other => panic!("expected invalid config, got {other:?}"),
    }
}

#[test]
fn literal_secrets_pass_through_trimmed() {
    assert_eq!(resolve_secret("  whsec_abc ").unwrap(), "whsec_abc");
}

#[test]
fn env_secrets_resolve_or_report_the_missing_name() {
    let path = std::env::var("PATH").unwrap();
    assert_eq!(resolve_secret("ENV[PATH]").unwrap(), path);

    match resolve_secret("ENV[HOOKRELAY_TEST_SURELY_UNSET_VAR]") {
        Err(ConfigError::MissingEnv(name)) => assert_eq!(name, "HOOKRELAY_TEST_SURELY_UNSET_VAR"),
        other => panic!("expected missing env, got {other:?}"),
    }
}

#[test]
fn provider_defaults_apply() {
    let document = parse_providers(
        r#"{"providers":[{"name":"acme","kind":"stripe","token":"tok","signing_secret":"s"}]}"#,
    )
    .unwrap();
    let setup = assemble(document, &window()).unwrap();

    let provider = &setup.directory.get("acme").unwrap().config;
    assert_eq!(provider.timestamp_tolerance_secs, DEFAULT_TOLERANCE_SECS);
    assert!(provider.timestamp_validation);
    assert_eq!(provider.max_payload_size_bytes, DEFAULT_MAX_PAYLOAD_BYTES);
    assert!(provider.active);
    assert!(provider.rate_limit.is_none());
    assert_eq!(provider.signing_secret.as_deref(), Some("s"));
    assert!(setup.registry.is_empty());
}

#[test]
fn actions_and_forward_targets_are_assembled() {
    let document = parse_providers(
        r#"{
            "providers": [{
                "name": "acme",
                "kind": "hmac_sha256",
                "token": "tok",
                "signing_secret": "",
                "rate_limit_requests": 10,
                "rate_limit_period_secs": 30,
                "actions": [
                    {"event_type": "order.created", "id": "audit", "priority": 5, "async": false},
                    {
                        "event_type": "order.created",
                        "action_id": "forward",
                        "max_attempts": 2,
                        "retry_delays": [10],
                        "forward_to": {"url": "https://hooks.example.com/in", "secret": "out"}
                    }
                ]
            }]
        }"#,
    )
    .unwrap();
    let setup = assemble(document, &window()).unwrap();

    let provider = &setup.directory.get("acme").unwrap().config;
    assert!(provider.signing_secret.is_none());
    assert_eq!(
        provider.rate_limit,
        Some(RateLimitPolicy {
            requests: 10,
            period_secs: 30
        })
    );

    let actions = setup.registry.actions_for("acme", "order.created");
    let ids: Vec<&str> = actions.iter().map(|a| a.action_id.as_str()).collect();
    assert_eq!(ids, ["audit", "forward"]);
    assert!(!actions[0].policy.run_async);
    assert_eq!(actions[0].policy.priority, 5);
    assert_eq!(actions[1].policy.max_attempts, 2);
    assert_eq!(actions[1].policy.retry_delays, vec![10]);
    assert!(actions[1].policy.run_async);

    assert_eq!(
        setup.forward_targets,
        vec![(
            "forward".to_string(),
            ForwardTarget {
                url: "https://hooks.example.com/in".to_string(),
                secret: Some("out".to_string()),
            }
        )]
    );
}

#[test]
fn invalid_documents_are_rejected() {
    assert_eq!(
        invalid_reason(r#"{"providers":[{"name":" ","kind":"unsigned","token":"t"}]}"#),
        "provider name is empty"
    );
    assert_eq!(
        invalid_reason(
            r#"{"providers":[
                {"name":"acme","kind":"unsigned","token":"t"},
                {"name":"acme","kind":"unsigned","token":"u"}
            ]}"#
        ),
        "duplicate provider acme"
    );
    assert_eq!(
        invalid_reason(r#"{"providers":[{"name":"acme","kind":"unsigned","token":""}]}"#),
        "provider acme has an empty token"
    );
    assert_eq!(
        invalid_reason(r#"{"providers":[{"name":"sq","kind":"square","token":"t"}]}"#),
        "provider sq needs notification_url"
    );
}

#[test]
fn unknown_verifier_kind_is_a_parse_error() {
    let err = parse_providers(r#"{"providers":[{"name":"a","kind":"paypal","token":"t"}]}"#)
        .unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn missing_providers_file_means_no_providers() {
    let dir = tempfile::tempdir().unwrap();
    let document = load_providers(&dir.path().join("providers.json")).unwrap();
    assert!(document.providers.is_empty());
}
