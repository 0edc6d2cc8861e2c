//! Identity validator configuration.
//!
//! Service settings are loaded from environment variables. The issuer list
//! is JSON, supplied inline via `ISSUERS_JSON` or as a file via
//! `ISSUERS_FILE`. Issuer secrets are redacted in Debug output.

use crate::auth::policy::{IssuerPolicy, IssuerType, PolicyError};
use crate::keys::ResolverSettings;
use common::config::ObservabilityConfig;
use common::secret::SecretString;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default timeout for discovery and JWKS requests.
pub const DEFAULT_JWKS_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default window, past TTL expiry, in which a stale key set may still be
/// served when a refresh fails.
pub const DEFAULT_JWKS_STALE_GRACE: Duration = Duration::from_secs(3600);

/// Default minimum spacing between unknown-`kid` refreshes of one issuer,
/// and between a failed refresh and the next one.
pub const DEFAULT_JWKS_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// One issuer record as it appears in configuration.
///
/// Field names follow the established issuer configuration format
/// (`clockSkewSeconds`, `jwksCacheTtlSeconds`, ...).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerConfig {
    /// Unique issuer name.
    pub name: String,

    /// `Symmetric` (`Jwt`) or `OidcDiscovery` (`Oidc`).
    #[serde(rename = "type")]
    pub issuer_type: IssuerType,

    /// Expected `iss` claim.
    pub issuer: String,

    /// Discovery authority (OIDC issuers only).
    #[serde(default)]
    pub authority: Option<String>,

    /// Accepted audiences.
    #[serde(default)]
    pub audiences: Vec<String>,

    /// HMAC secret (symmetric issuers only).
    #[serde(default)]
    pub secret: Option<SecretString>,

    /// Clock skew tolerance; defaults to 300 seconds.
    #[serde(default)]
    pub clock_skew_seconds: Option<u64>,

    /// JWKS cache TTL; defaults to 24 hours.
    #[serde(default)]
    pub jwks_cache_ttl_seconds: Option<u64>,
}

impl TryFrom<&IssuerConfig> for IssuerPolicy {
    type Error = PolicyError;

    fn try_from(config: &IssuerConfig) -> Result<Self, Self::Error> {
        let policy = match config.issuer_type {
            IssuerType::Symmetric => {
                if config.authority.is_some() {
                    return Err(PolicyError::UnexpectedAuthority(config.name.clone()));
                }
                let secret = config
                    .secret
                    .clone()
                    .ok_or_else(|| PolicyError::MissingSecret(config.name.clone()))?;
                IssuerPolicy::symmetric(
                    config.name.clone(),
                    config.issuer.clone(),
                    config.audiences.clone(),
                    secret,
                )?
            }
            IssuerType::OidcDiscovery => {
                if config.secret.is_some() {
                    return Err(PolicyError::UnexpectedSecret(config.name.clone()));
                }
                let authority = config
                    .authority
                    .clone()
                    .ok_or_else(|| PolicyError::MissingAuthority(config.name.clone()))?;
                let policy = IssuerPolicy::oidc_discovery(
                    config.name.clone(),
                    config.issuer.clone(),
                    config.audiences.clone(),
                    authority,
                )?;
                match config.jwks_cache_ttl_seconds {
                    Some(secs) => policy.with_jwks_cache_ttl(Duration::from_secs(secs))?,
                    None => policy,
                }
            }
        };

        match config.clock_skew_seconds {
            Some(secs) => policy.with_clock_skew(Duration::from_secs(secs)),
            None => Ok(policy),
        }
    }
}

/// Identity validator service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Trusted issuers in trial order.
    pub issuers: Vec<IssuerConfig>,

    /// Require HTTPS for discovery and JWKS URLs (default: true).
    pub require_https_metadata: bool,

    /// Timeout applied to each discovery/JWKS request.
    pub jwks_http_timeout: Duration,

    /// How long past expiry a stale key set may be served on fetch failure.
    pub jwks_stale_grace: Duration,

    /// Minimum spacing between unknown-`kid` refreshes for one issuer, and
    /// after a failed refresh.
    pub jwks_min_refresh_interval: Duration,

    /// Symmetric issuer used by the development token endpoint, if enabled.
    pub dev_token_issuer: Option<String>,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No issuers configured: set ISSUERS_JSON or ISSUERS_FILE")]
    MissingIssuers,

    #[error("Failed to read issuers file '{path}': {reason}")]
    IssuersFile { path: String, reason: String },

    #[error("Invalid issuers configuration: {0}")]
    InvalidIssuers(String),

    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let issuers_json = if let Some(json) = vars.get("ISSUERS_JSON") {
            json.clone()
        } else if let Some(path) = vars.get("ISSUERS_FILE") {
            std::fs::read_to_string(path).map_err(|e| ConfigError::IssuersFile {
                path: path.clone(),
                reason: e.to_string(),
            })?
        } else {
            return Err(ConfigError::MissingIssuers);
        };

        let issuers: Vec<IssuerConfig> = serde_json::from_str(&issuers_json)
            .map_err(|e| ConfigError::InvalidIssuers(e.to_string()))?;
        if issuers.is_empty() {
            return Err(ConfigError::MissingIssuers);
        }

        let require_https_metadata = parse_bool(vars, "REQUIRE_HTTPS_METADATA", true)?;

        let jwks_http_timeout =
            parse_seconds(vars, "JWKS_HTTP_TIMEOUT_SECONDS", DEFAULT_JWKS_HTTP_TIMEOUT)?;
        if jwks_http_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                var: "JWKS_HTTP_TIMEOUT_SECONDS",
                reason: "must be greater than 0".to_string(),
            });
        }

        let jwks_stale_grace =
            parse_seconds(vars, "JWKS_STALE_GRACE_SECONDS", DEFAULT_JWKS_STALE_GRACE)?;
        let jwks_min_refresh_interval = parse_seconds(
            vars,
            "JWKS_MIN_REFRESH_INTERVAL_SECONDS",
            DEFAULT_JWKS_MIN_REFRESH_INTERVAL,
        )?;

        let dev_token_issuer = vars
            .get("DEV_TOKEN_ISSUER")
            .filter(|v| !v.trim().is_empty())
            .cloned();

        if let Some(name) = &dev_token_issuer {
            let issuer = issuers.iter().find(|i| &i.name == name);
            match issuer {
                Some(i) if i.issuer_type == IssuerType::Symmetric => {}
                Some(_) => {
                    return Err(ConfigError::InvalidValue {
                        var: "DEV_TOKEN_ISSUER",
                        reason: format!("issuer '{name}' is not a symmetric issuer"),
                    })
                }
                None => {
                    return Err(ConfigError::InvalidValue {
                        var: "DEV_TOKEN_ISSUER",
                        reason: format!("issuer '{name}' is not configured"),
                    })
                }
            }
        }

        Ok(Config {
            bind_address,
            issuers,
            require_https_metadata,
            jwks_http_timeout,
            jwks_stale_grace,
            jwks_min_refresh_interval,
            dev_token_issuer,
            observability: ObservabilityConfig::from_vars(vars),
        })
    }

    /// Key resolver settings derived from this configuration.
    #[must_use]
    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            http_timeout: self.jwks_http_timeout,
            stale_grace: self.jwks_stale_grace,
            min_refresh_interval: self.jwks_min_refresh_interval,
            require_https_metadata: self.require_https_metadata,
        }
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(var).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            var,
            reason: format!("expected true/false, got '{v}'"),
        }),
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    var: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match vars.get(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue {
                var,
                reason: format!("must be a non-negative integer, got '{value}': {e}"),
            }),
    }
}
