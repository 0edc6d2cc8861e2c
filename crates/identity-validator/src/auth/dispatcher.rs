//! Multi-issuer token authentication.
//!
//! A token is parsed once, then offered to each candidate issuer in turn
//! (issuers whose `iss` matches first, then the rest in registration order).
//! The first issuer that accepts it wins. Per-issuer rejections are kept for
//! server-side logs; callers only see [`AuthenticationFailed`].
//!
//! Keys are only resolved for issuers whose key family fits the token's
//! `alg`, so an HMAC token never triggers a discovery fetch.

use crate::auth::claims::ValidatedClaims;
use crate::auth::diagnostics::{Diagnostics, FailureCategory};
use crate::auth::registry::IssuerRegistry;
use crate::auth::validator::{ParsedToken, TokenValidator};
use crate::keys::KeyMaterialResolver;
use crate::observability::metrics::{
    record_auth_outcome, record_issuer_failure, record_issuer_success,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

/// One issuer's rejection of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerAttempt {
    pub issuer_name: String,
    pub category: FailureCategory,
    /// Server-side detail. Never sent to clients.
    pub detail: String,
}

impl fmt::Display for IssuerAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.issuer_name, self.category, self.detail)
    }
}

/// Every candidate issuer rejected the token, or it never got that far.
///
/// `Display` never names an issuer or a reason.
#[derive(Debug, Clone, Error)]
#[error("The access token is invalid or expired")]
pub struct AuthenticationFailed {
    malformed: Option<String>,
    attempts: Vec<IssuerAttempt>,
}

impl AuthenticationFailed {
    fn malformed(reason: String) -> Self {
        Self {
            malformed: Some(reason),
            attempts: Vec::new(),
        }
    }

    fn rejected(attempts: Vec<IssuerAttempt>) -> Self {
        Self {
            malformed: None,
            attempts,
        }
    }

    /// Per-issuer rejections, in the order the issuers were tried.
    #[must_use]
    pub fn attempts(&self) -> &[IssuerAttempt] {
        &self.attempts
    }

    /// Why the token failed the structural check, if it did.
    #[must_use]
    pub fn malformed_reason(&self) -> Option<&str> {
        self.malformed.as_deref()
    }

    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.malformed.is_some()
    }

    /// Compact summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.malformed {
            Some(reason) => format!("malformed: {reason}"),
            None => self
                .attempts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Tries each candidate issuer until one accepts the token.
pub struct MultiIssuerDispatcher {
    registry: Arc<IssuerRegistry>,
    resolver: Arc<KeyMaterialResolver>,
    diagnostics: Arc<Diagnostics>,
    validator: TokenValidator,
}

impl MultiIssuerDispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<IssuerRegistry>,
        resolver: Arc<KeyMaterialResolver>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            registry,
            resolver,
            diagnostics,
            validator: TokenValidator::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<IssuerRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<KeyMaterialResolver> {
        &self.resolver
    }

    #[must_use]
    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Authenticate `token` against the current time.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if the token is malformed or every
    /// candidate issuer rejects it.
    pub async fn authenticate(&self, token: &str) -> Result<ValidatedClaims, AuthenticationFailed> {
        self.authenticate_at(token, Utc::now()).await
    }

    /// Authenticate `token` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if the token is malformed or every
    /// candidate issuer rejects it.
    #[instrument(skip_all, name = "idv.auth.authenticate")]
    pub async fn authenticate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ValidatedClaims, AuthenticationFailed> {
        let start = Instant::now();

        let parsed = match ParsedToken::parse(token) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(target: "idv.auth.dispatcher", error = %e, "Token rejected before issuer selection");
                self.diagnostics.record_malformed();
                record_auth_outcome("malformed", start.elapsed());
                return Err(AuthenticationFailed::malformed(e.to_string()));
            }
        };

        let candidates = self.registry.policies_for_issuer(parsed.issuer());
        let mut attempts = Vec::with_capacity(candidates.len());

        for policy in candidates {
            let name = policy.name();

            // Skipped before resolution so a forged token cannot make us
            // fetch keys it could never verify against.
            if let Err(e) = self.validator.check_algorithm(&parsed, &policy) {
                tracing::debug!(target: "idv.auth.dispatcher", issuer = %name, error = %e, "Issuer skipped");
                self.record_failure(&mut attempts, name, e.category(), e.to_string());
                continue;
            }

            let material = match self.resolver.resolve(&policy, parsed.kid()).await {
                Ok(material) => material,
                Err(e) => {
                    tracing::debug!(target: "idv.auth.dispatcher", issuer = %name, error = %e, "Key resolution failed");
                    self.record_failure(&mut attempts, name, FailureCategory::KeyResolution, e.to_string());
                    continue;
                }
            };

            match self.validator.validate_parsed(&parsed, &policy, &material, now) {
                Ok(claims) => {
                    tracing::debug!(target: "idv.auth.dispatcher", issuer = %name, "Token accepted");
                    self.diagnostics.record_success(name, now);
                    record_issuer_success(name);
                    record_auth_outcome("success", start.elapsed());
                    return Ok(claims);
                }
                Err(e) => {
                    tracing::debug!(target: "idv.auth.dispatcher", issuer = %name, error = %e, "Issuer rejected token");
                    self.record_failure(&mut attempts, name, e.category(), e.to_string());
                }
            }
        }

        let failed = AuthenticationFailed::rejected(attempts);
        tracing::info!(
            target: "idv.auth.dispatcher",
            issuers_tried = failed.attempts().len(),
            reasons = %failed.summary(),
            "Authentication failed"
        );
        record_auth_outcome("failure", start.elapsed());
        Err(failed)
    }

    fn record_failure(
        &self,
        attempts: &mut Vec<IssuerAttempt>,
        issuer_name: &str,
        category: FailureCategory,
        detail: String,
    ) {
        self.diagnostics.record_failure(issuer_name, category);
        record_issuer_failure(issuer_name, category.as_str());
        attempts.push(IssuerAttempt {
            issuer_name: issuer_name.to_string(),
            category,
            detail,
        });
    }
}
