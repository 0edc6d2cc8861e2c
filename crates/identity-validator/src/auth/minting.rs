//! Development token minting for a symmetric issuer.
//!
//! Only enabled when `DEV_TOKEN_ISSUER` names a configured symmetric issuer.
//! Tokens are HS256, valid for one hour, and carry the issuer's first
//! configured audience so the dispatcher accepts them unchanged.

use crate::auth::policy::{IssuerKind, IssuerPolicy};
use chrono::{DateTime, Duration, Utc};
use common::secret::ExposeSecret;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifetime of minted tokens.
pub const DEV_TOKEN_LIFETIME_SECONDS: i64 = 3600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IssueError {
    #[error("issuer '{0}' is not a symmetric issuer")]
    NotSymmetric(String),

    #[error("issuer '{0}' has no audience")]
    NoAudience(String),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("token signing failed")]
    Signing,
}

/// Token request body. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenRequest {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub roles: Option<Vec<String>>,
    pub tenant_id: Option<String>,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            user_id: "test-user-123".to_string(),
            email: "test@example.com".to_string(),
            name: "Test User".to_string(),
            roles: None,
            tenant_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct DevClaims<'a> {
    sub: &'a str,
    email: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    roles: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tid: Option<&'a str>,
    #[serde(rename = "tenantId", skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
    iss: &'a str,
    aud: &'a str,
    iat: i64,
    nbf: i64,
    exp: i64,
}

/// A signed token and its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs HS256 tokens on behalf of one symmetric issuer.
pub struct TokenIssuer {
    issuer_name: String,
    issuer: String,
    audience: String,
    key: EncodingKey,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer_name", &self.issuer_name)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl TokenIssuer {
    /// Create an issuer for `policy`.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::NotSymmetric` for discovery issuers, and
    /// `IssueError::NoAudience` if the policy has no audience.
    pub fn for_policy(policy: &IssuerPolicy) -> Result<Self, IssueError> {
        let IssuerKind::Symmetric { secret } = policy.kind() else {
            return Err(IssueError::NotSymmetric(policy.name().to_string()));
        };
        let audience = policy
            .audiences()
            .first()
            .ok_or_else(|| IssueError::NoAudience(policy.name().to_string()))?;

        Ok(Self {
            issuer_name: policy.name().to_string(),
            issuer: policy.issuer().to_string(),
            audience: audience.clone(),
            key: EncodingKey::from_secret(secret.expose_secret().as_bytes()),
        })
    }

    #[must_use]
    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    /// Sign a token for `request`, valid from `now` for one hour.
    ///
    /// # Errors
    ///
    /// Returns `IssueError::EmptyField` if `userId` is empty, or
    /// `IssueError::Signing` if encoding fails.
    pub fn issue(&self, request: &TokenRequest, now: DateTime<Utc>) -> Result<IssuedToken, IssueError> {
        if request.user_id.trim().is_empty() {
            return Err(IssueError::EmptyField("userId"));
        }

        let expires_at = now + Duration::seconds(DEV_TOKEN_LIFETIME_SECONDS);
        let roles = request.roles.as_deref().filter(|r| !r.is_empty());
        let tenant_id = request.tenant_id.as_deref().filter(|t| !t.is_empty());

        let claims = DevClaims {
            sub: &request.user_id,
            email: &request.email,
            name: &request.name,
            role: roles,
            roles: roles.map(|r| r.join(",")),
            tid: tenant_id,
            tenant_id,
            iss: &self.issuer,
            aud: &self.audience,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some("JWT".to_string());

        let token = encode(&header, &claims, &self.key).map_err(|e| {
            tracing::error!(target: "idv.auth.minting", error = %e, "Token signing failed");
            IssueError::Signing
        })?;

        tracing::info!(target: "idv.auth.minting", issuer = %self.issuer_name, "Issued development token");

        Ok(IssuedToken { token, expires_at })
    }
}
