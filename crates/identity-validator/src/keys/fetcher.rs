//! Retrieval of signing keys from OIDC providers.
//!
//! [`KeyFetcher`] is the seam between key caching and the network: the
//! resolver only ever asks for "the current key set of this authority".

use crate::keys::jwks::{DiscoveryDocument, JwksDocument};
use crate::keys::KeyResolutionError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::instrument;

/// Path of the discovery document relative to the authority.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Source of JWKS documents for discovery-based issuers.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetch the current key set published under `authority`.
    async fn fetch_key_set(&self, authority: &str) -> Result<JwksDocument, KeyResolutionError>;
}

/// Fetches discovery metadata and key sets over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeyFetcher {
    http_client: reqwest::Client,
    timeout: Duration,
    require_https: bool,
}

impl HttpKeyFetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration, require_https: bool) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "idv.keys.fetch", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            http_client,
            timeout,
            require_https,
        }
    }

    fn check_url(&self, url: &str) -> Result<(), KeyResolutionError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| {
            tracing::warn!(target: "idv.keys.fetch", url = %url, error = %e, "Invalid metadata URL");
            KeyResolutionError::InsecureMetadataUrl(url.to_string())
        })?;

        let allowed = match parsed.scheme() {
            "https" => true,
            "http" => !self.require_https,
            _ => false,
        };
        if !allowed {
            tracing::warn!(target: "idv.keys.fetch", url = %url, "Refusing metadata URL: HTTPS required");
            return Err(KeyResolutionError::InsecureMetadataUrl(url.to_string()));
        }
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        to_error: fn(String) -> KeyResolutionError,
    ) -> Result<T, KeyResolutionError> {
        self.check_url(url)?;

        let response = self.http_client.get(url).send().await.map_err(|e| {
            tracing::warn!(target: "idv.keys.fetch", url = %url, error = %e, "Metadata request failed");
            if e.is_timeout() {
                KeyResolutionError::Timeout {
                    seconds: self.timeout.as_secs(),
                }
            } else {
                to_error(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(target: "idv.keys.fetch", url = %url, status = %status, "Metadata endpoint returned error");
            return Err(to_error(format!("HTTP {status}")));
        }

        response.json::<T>().await.map_err(|e| {
            tracing::warn!(target: "idv.keys.fetch", url = %url, error = %e, "Failed to parse metadata response");
            to_error(format!("invalid response body: {e}"))
        })
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    #[instrument(skip(self), target = "idv.keys.fetch")]
    async fn fetch_key_set(&self, authority: &str) -> Result<JwksDocument, KeyResolutionError> {
        let discovery_url = format!("{}{DISCOVERY_PATH}", authority.trim_end_matches('/'));
        let discovery: DiscoveryDocument = self
            .get_json(&discovery_url, KeyResolutionError::Discovery)
            .await?;

        tracing::debug!(
            target: "idv.keys.fetch",
            jwks_uri = %discovery.jwks_uri,
            "Discovery document fetched"
        );

        self.get_json(&discovery.jwks_uri, KeyResolutionError::JwksFetch)
            .await
    }
}
