//! Mock OIDC issuer backed by wiremock.
//!
//! Serves `/.well-known/openid-configuration` and a JWKS at `/keys`, and
//! counts the requests each endpoint receives.

use crate::crypto_fixtures::{jwks_json, TestKeypair};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
pub const JWKS_PATH: &str = "/keys";

/// A running mock OIDC issuer.
///
/// Its issuer string and authority are both [`MockOidcIssuer::uri`]. The
/// URI is plain HTTP, so validators must be configured to allow it.
pub struct MockOidcIssuer {
    server: MockServer,
}

impl MockOidcIssuer {
    /// Start an issuer publishing `keys`.
    pub async fn start(keys: &[&TestKeypair]) -> Self {
        Self::start_with_delay(keys, Duration::ZERO).await
    }

    /// Start an issuer whose JWKS responses are delayed by `delay`.
    pub async fn start_with_delay(keys: &[&TestKeypair], delay: Duration) -> Self {
        let issuer = Self {
            server: MockServer::start().await,
        };
        issuer.publish(keys, delay).await;
        issuer
    }

    /// Issuer string and authority URL.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Replace the published key set.
    ///
    /// Request counters restart from zero.
    pub async fn rotate_keys(&self, keys: &[&TestKeypair]) {
        self.rotate_keys_with_delay(keys, Duration::ZERO).await;
    }

    /// Replace the published key set, delaying JWKS responses by `delay`.
    ///
    /// Request counters restart from zero.
    pub async fn rotate_keys_with_delay(&self, keys: &[&TestKeypair], delay: Duration) {
        self.server.reset().await;
        self.publish(keys, delay).await;
    }

    /// Make every endpoint return HTTP 503.
    ///
    /// Request counters restart from zero.
    pub async fn go_down(&self) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&self.server)
            .await;
    }

    /// Requests received by the JWKS endpoint.
    pub async fn jwks_requests(&self) -> usize {
        self.requests_to(JWKS_PATH).await
    }

    /// Requests received by the discovery endpoint.
    pub async fn discovery_requests(&self) -> usize {
        self.requests_to(DISCOVERY_PATH).await
    }

    async fn requests_to(&self, request_path: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == request_path)
            .count()
    }

    async fn publish(&self, keys: &[&TestKeypair], delay: Duration) {
        let uri = self.server.uri();

        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": uri,
                "jwks_uri": format!("{uri}{JWKS_PATH}")
            })))
            .mount(&self.server)
            .await;

        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_json(keys))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }
}
