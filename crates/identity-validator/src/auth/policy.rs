//! Per-issuer validation policy.
//!
//! An [`IssuerPolicy`] is immutable once built. The secret/authority split is
//! carried by [`IssuerKind`], so a symmetric policy can never carry an
//! authority and a discovery policy can never carry a secret.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default JWKS cache TTL for discovery issuers (24 hours).
pub const DEFAULT_JWKS_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Shortest JWKS cache TTL accepted from configuration.
pub const MIN_JWKS_CACHE_TTL: Duration = Duration::from_secs(30);

/// Issuer type as written in configuration.
///
/// `Jwt` and `Oidc` are accepted as aliases for the names used by older
/// issuer configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssuerType {
    /// Tokens signed with a shared HMAC secret.
    #[serde(alias = "Jwt")]
    Symmetric,

    /// Tokens signed with keys published through OIDC discovery.
    #[serde(alias = "Oidc")]
    OidcDiscovery,
}

impl fmt::Display for IssuerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssuerType::Symmetric => f.write_str("Symmetric"),
            IssuerType::OidcDiscovery => f.write_str("OidcDiscovery"),
        }
    }
}

/// Key source for an issuer.
#[derive(Debug, Clone)]
pub enum IssuerKind {
    /// Shared HMAC secret.
    Symmetric {
        /// Raw secret; its UTF-8 bytes are the HMAC key.
        secret: SecretString,
    },

    /// OIDC discovery authority whose JWKS is fetched and cached.
    OidcDiscovery {
        /// Authority base URL; discovery lives under `/.well-known/openid-configuration`.
        authority: String,

        /// How long a fetched key set is considered fresh.
        jwks_cache_ttl: Duration,
    },
}

/// Reasons a policy is rejected at configuration time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("issuer name must not be empty")]
    EmptyName,

    #[error("issuer '{0}': issuer string must not be empty")]
    EmptyIssuer(String),

    #[error("issuer '{0}': at least one audience is required")]
    NoAudiences(String),

    #[error("issuer '{0}': symmetric issuers require a non-empty secret")]
    MissingSecret(String),

    #[error("issuer '{0}': discovery issuers require an authority URL")]
    MissingAuthority(String),

    #[error("issuer '{0}': symmetric issuers must not set an authority")]
    UnexpectedAuthority(String),

    #[error("issuer '{0}': discovery issuers must not set a secret")]
    UnexpectedSecret(String),

    #[error("issuer '{name}': clock skew {seconds}s exceeds maximum of {max}s")]
    ClockSkewTooLarge { name: String, seconds: u64, max: u64 },

    #[error("issuer '{name}': JWKS cache TTL {seconds}s is below minimum of {min}s")]
    CacheTtlTooSmall { name: String, seconds: u64, min: u64 },
}

/// Validation policy for one trusted issuer.
#[derive(Debug, Clone)]
pub struct IssuerPolicy {
    name: String,
    issuer: String,
    audiences: Vec<String>,
    kind: IssuerKind,
    clock_skew: Duration,
}

impl IssuerPolicy {
    /// Build a policy for an HMAC-signing issuer.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` if the name, issuer, audiences or secret are empty.
    pub fn symmetric(
        name: impl Into<String>,
        issuer: impl Into<String>,
        audiences: Vec<String>,
        secret: SecretString,
    ) -> Result<Self, PolicyError> {
        let name = name.into();
        if secret.expose_secret().is_empty() {
            return Err(PolicyError::MissingSecret(name));
        }
        Self::build(name, issuer.into(), audiences, IssuerKind::Symmetric { secret })
    }

    /// Build a policy for an OIDC discovery issuer with the default cache TTL.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError` if the name, issuer, audiences or authority are empty.
    pub fn oidc_discovery(
        name: impl Into<String>,
        issuer: impl Into<String>,
        audiences: Vec<String>,
        authority: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        let name = name.into();
        let authority = authority.into();
        if authority.trim().is_empty() {
            return Err(PolicyError::MissingAuthority(name));
        }
        Self::build(
            name,
            issuer.into(),
            audiences,
            IssuerKind::OidcDiscovery {
                authority: authority.trim_end_matches('/').to_string(),
                jwks_cache_ttl: DEFAULT_JWKS_CACHE_TTL,
            },
        )
    }

    fn build(
        name: String,
        issuer: String,
        audiences: Vec<String>,
        kind: IssuerKind,
    ) -> Result<Self, PolicyError> {
        if name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if issuer.trim().is_empty() {
            return Err(PolicyError::EmptyIssuer(name));
        }

        // Ordered, de-duplicated, blanks dropped
        let mut unique: Vec<String> = Vec::with_capacity(audiences.len());
        for audience in audiences {
            if !audience.is_empty() && !unique.contains(&audience) {
                unique.push(audience);
            }
        }
        if unique.is_empty() {
            return Err(PolicyError::NoAudiences(name));
        }

        Ok(Self {
            name,
            issuer,
            audiences: unique,
            kind,
            clock_skew: DEFAULT_CLOCK_SKEW,
        })
    }

    /// Override the clock skew tolerance.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::ClockSkewTooLarge` above `MAX_CLOCK_SKEW`.
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Result<Self, PolicyError> {
        if clock_skew > MAX_CLOCK_SKEW {
            return Err(PolicyError::ClockSkewTooLarge {
                name: self.name,
                seconds: clock_skew.as_secs(),
                max: MAX_CLOCK_SKEW.as_secs(),
            });
        }
        self.clock_skew = clock_skew;
        Ok(self)
    }

    /// Override the JWKS cache TTL. Ignored for symmetric issuers.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::CacheTtlTooSmall` below `MIN_JWKS_CACHE_TTL`.
    pub fn with_jwks_cache_ttl(mut self, ttl: Duration) -> Result<Self, PolicyError> {
        if ttl < MIN_JWKS_CACHE_TTL {
            return Err(PolicyError::CacheTtlTooSmall {
                name: self.name,
                seconds: ttl.as_secs(),
                min: MIN_JWKS_CACHE_TTL.as_secs(),
            });
        }
        if let IssuerKind::OidcDiscovery { jwks_cache_ttl, .. } = &mut self.kind {
            *jwks_cache_ttl = ttl;
        }
        Ok(self)
    }

    /// Unique configured name (e.g. `LocalAuth`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Expected `iss` claim value.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Accepted audiences, in configuration order.
    #[must_use]
    pub fn audiences(&self) -> &[String] {
        &self.audiences
    }

    /// Key source for this issuer.
    #[must_use]
    pub fn kind(&self) -> &IssuerKind {
        &self.kind
    }

    /// Configuration-level type of this issuer.
    #[must_use]
    pub fn issuer_type(&self) -> IssuerType {
        match self.kind {
            IssuerKind::Symmetric { .. } => IssuerType::Symmetric,
            IssuerKind::OidcDiscovery { .. } => IssuerType::OidcDiscovery,
        }
    }

    /// Clock skew tolerance for `exp`, `nbf` and `iat`.
    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }
}
