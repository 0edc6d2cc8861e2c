//! End-to-end authentication against a symmetric issuer.
//!
//! Configuration is loaded the same way the binary loads it, then tokens
//! go through the full dispatcher and projector.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use identity_test_utils::{sign_hs256, tamper_signature, TestClaimsBuilder};
use identity_validator::auth::{ClaimsProjector, FailureCategory, DEFAULT_TENANT_ID};
use identity_validator::config::Config;
use identity_validator::auth::{IssuerRegistry, RegistryError};
use identity_validator::routes::{AppState, StateError};
use std::collections::HashMap;

const SECRET: &str = "ThisIsAVerySecureSecretKeyForTestingPurposes123456!";
const ISSUER: &str = "https://localhost:5001";
const AUDIENCE: &str = "api://primus-test-app";

fn state() -> AppState {
    let issuers = serde_json::json!([
        {
            "name": "LocalAuth",
            "type": "Jwt",
            "issuer": ISSUER,
            "audiences": [AUDIENCE],
            "secret": SECRET
        },
        {
            "name": "Partner",
            "type": "Symmetric",
            "issuer": "https://partner.example",
            "audiences": ["api://partner"],
            "secret": "partner-secret-partner-secret-partner-secret"
        }
    ]);
    let vars = HashMap::from([("ISSUERS_JSON".to_string(), issuers.to_string())]);
    AppState::new(Config::from_vars(&vars).unwrap()).unwrap()
}

fn local_token() -> TestClaimsBuilder {
    TestClaimsBuilder::new(ISSUER, AUDIENCE)
        .for_user("u1")
        .expires_in(3600)
}

#[tokio::test]
async fn test_valid_token_authenticates_with_issuer_name() {
    let state = state();
    let token = sign_hs256(&local_token().build(), SECRET);

    let claims = state.dispatcher.authenticate(&token).await.unwrap();
    assert_eq!(claims.subject, "u1");
    assert_eq!(claims.issuer_name, "LocalAuth");
    assert_eq!(claims.audience, AUDIENCE);

    assert!(state
        .dispatcher
        .diagnostics()
        .last_success("LocalAuth")
        .is_some());
}

#[tokio::test]
async fn test_wrong_audience_is_rejected() {
    let state = state();
    let token = sign_hs256(&local_token().with_audience("wrong-aud").build(), SECRET);

    let err = state.dispatcher.authenticate(&token).await.unwrap_err();
    let local = err
        .attempts()
        .iter()
        .find(|a| a.issuer_name == "LocalAuth")
        .unwrap();
    assert_eq!(local.category, FailureCategory::AudienceMismatch);
    assert_eq!(err.to_string(), "The access token is invalid or expired");
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let state = state();
    let token = sign_hs256(&local_token().expires_in(-301).build(), SECRET);

    let err = state.dispatcher.authenticate(&token).await.unwrap_err();
    assert_eq!(err.attempts().first().unwrap().category, FailureCategory::Expired);
    assert_eq!(
        state
            .dispatcher
            .diagnostics()
            .failure_count("LocalAuth", FailureCategory::Expired),
        1
    );
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let state = state();
    let token = tamper_signature(&sign_hs256(&local_token().build(), SECRET));

    let err = state.dispatcher.authenticate(&token).await.unwrap_err();
    assert!(err
        .attempts()
        .iter()
        .all(|a| a.category == FailureCategory::BadSignature));
}

#[tokio::test]
async fn test_projection_of_authenticated_token() {
    let state = state();
    let token = sign_hs256(
        &local_token()
            .with_email("u1@example.com")
            .with_roles(&["Admin"])
            .build(),
        SECRET,
    );

    let claims = state.dispatcher.authenticate(&token).await.unwrap();
    let projector = ClaimsProjector::new();
    let (user, tenant) = projector.project(&claims);

    assert_eq!(user.email, "u1@example.com");
    assert_eq!(user.display_name, "u1");
    assert_eq!(tenant.tenant_id, DEFAULT_TENANT_ID);
    assert_eq!(tenant.roles, ["Admin"]);
    assert_eq!(projector.project(&claims), (user, tenant));
}

#[tokio::test]
async fn test_second_issuer_accepts_its_own_tokens() {
    let state = state();
    let token = sign_hs256(
        &TestClaimsBuilder::new("https://partner.example", "api://partner").build(),
        "partner-secret-partner-secret-partner-secret",
    );

    let claims = state.dispatcher.authenticate(&token).await.unwrap();
    assert_eq!(claims.issuer_name, "Partner");
}

#[test]
fn test_duplicate_issuer_name_prevents_startup() {
    let issuers = serde_json::json!([
        {
            "name": "LocalAuth",
            "type": "Jwt",
            "issuer": ISSUER,
            "audiences": [AUDIENCE],
            "secret": SECRET
        },
        {
            "name": "LocalAuth",
            "type": "Symmetric",
            "issuer": "https://partner.example",
            "audiences": ["api://partner"],
            "secret": "partner-secret-partner-secret-partner-secret"
        }
    ]);
    let vars = HashMap::from([("ISSUERS_JSON".to_string(), issuers.to_string())]);
    let config = Config::from_vars(&vars).unwrap();

    assert_eq!(
        IssuerRegistry::from_config(&config.issuers).unwrap_err(),
        RegistryError::DuplicateIssuer("LocalAuth".to_string())
    );

    let err = AppState::new(config).err().unwrap();
    assert!(matches!(
        err,
        StateError::Registry(RegistryError::DuplicateIssuer(ref name)) if name == "LocalAuth"
    ));
}
