//! Token validation against a single issuer policy.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The header `alg` must belong to the key family of the resolved key
//!   material, so an HMAC token can never be checked against a public key
//! - Checks run in a fixed order and stop at the first failure:
//!   structure, signature, issuer, audience, lifetime

use crate::auth::claims::ValidatedClaims;
use crate::auth::diagnostics::FailureCategory;
use crate::auth::policy::{IssuerKind, IssuerPolicy};
use crate::keys::{KeyFamily, KeyMaterial, KeySnapshot};
use chrono::{DateTime, Utc};
use common::jwt::{
    decode_json_segment, normalize_issuer, split_compact, validate_iat_at, CompactParts,
    JwtValidationError,
};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::str::FromStr;
use thiserror::Error;

/// Reasons a single issuer rejects a token.
///
/// These stay inside the dispatcher and server-side logs; callers only ever
/// see the aggregate failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("signature verification failed: {0}")]
    BadSignature(String),

    #[error("issuer mismatch")]
    IssuerMismatch,

    #[error("audience mismatch")]
    AudienceMismatch,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,
}

impl ValidationError {
    #[must_use]
    pub fn category(&self) -> FailureCategory {
        match self {
            ValidationError::Malformed(_) => FailureCategory::Malformed,
            ValidationError::BadSignature(_) => FailureCategory::BadSignature,
            ValidationError::IssuerMismatch => FailureCategory::IssuerMismatch,
            ValidationError::AudienceMismatch => FailureCategory::AudienceMismatch,
            ValidationError::Expired => FailureCategory::Expired,
            ValidationError::NotYetValid => FailureCategory::NotYetValid,
        }
    }
}

impl From<JwtValidationError> for ValidationError {
    fn from(e: JwtValidationError) -> Self {
        let reason = match e {
            JwtValidationError::TokenTooLarge => "token exceeds size limit",
            JwtValidationError::MalformedToken => "invalid compact serialization",
            JwtValidationError::EncryptedToken => "encrypted tokens are not supported",
            JwtValidationError::IatTooFarInFuture => return ValidationError::NotYetValid,
        };
        ValidationError::Malformed(reason.to_string())
    }
}

/// `aud` as either a single string or an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AudienceClaim {
    Single(String),
    Multiple(Vec<String>),
}

impl AudienceClaim {
    fn contains(&self, audience: &str) -> bool {
        match self {
            AudienceClaim::Single(aud) => aud == audience,
            AudienceClaim::Multiple(auds) => auds.iter().any(|a| a == audience),
        }
    }
}

/// A structurally valid, not yet verified token.
///
/// Parsing happens once per token; the result is checked against each
/// candidate issuer in turn.
#[derive(Debug, Clone)]
pub struct ParsedToken<'a> {
    parts: CompactParts<'a>,
    algorithm: Algorithm,
    kid: Option<String>,
    payload: Map<String, Value>,
    subject: String,
    issuer: Option<String>,
    expires: Option<i64>,
    not_before: Option<i64>,
    issued_at: Option<i64>,
}

impl<'a> ParsedToken<'a> {
    /// Parse a compact JWS.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::Malformed` if the token is too large, is a
    /// JWE, is not three base64url JSON segments, names an unsupported `alg`,
    /// lacks a string `sub`, or carries non-numeric time claims.
    pub fn parse(token: &'a str) -> Result<Self, ValidationError> {
        let parts = split_compact(token)?;
        let header = decode_json_segment(parts.header)?;
        let payload = decode_json_segment(parts.payload)?;

        let alg = header
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| ValidationError::Malformed("header has no alg".to_string()))?;
        let algorithm = Algorithm::from_str(alg)
            .map_err(|_| ValidationError::Malformed(format!("unsupported alg '{alg}'")))?;

        let kid = header
            .get("kid")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .map(ToString::to_string);

        let subject = payload
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| ValidationError::Malformed("missing sub claim".to_string()))?;

        let issuer = payload
            .get("iss")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let expires = numeric_date(&payload, "exp")?;
        let not_before = numeric_date(&payload, "nbf")?;
        let issued_at = numeric_date(&payload, "iat")?;

        Ok(Self {
            parts,
            algorithm,
            kid,
            payload,
            subject,
            issuer,
            expires,
            not_before,
            issued_at,
        })
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Unverified `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }
}

/// NumericDate claim as whole seconds. Fractional values are truncated.
fn numeric_date(payload: &Map<String, Value>, name: &str) -> Result<Option<i64>, ValidationError> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            #[allow(clippy::cast_possible_truncation)]
            let seconds = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
            seconds
                .map(Some)
                .ok_or_else(|| ValidationError::Malformed(format!("invalid {name} claim")))
        }
        Some(_) => Err(ValidationError::Malformed(format!(
            "{name} claim is not a number"
        ))),
    }
}

/// Validates tokens against one issuer policy and its key material.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenValidator;

impl TokenValidator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate `token` for `policy` at time `now`.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as a `ValidationError`.
    pub fn validate(
        &self,
        token: &str,
        policy: &IssuerPolicy,
        key_material: &KeyMaterial,
        now: DateTime<Utc>,
    ) -> Result<ValidatedClaims, ValidationError> {
        let parsed = ParsedToken::parse(token)?;
        self.validate_parsed(&parsed, policy, key_material, now)
    }

    /// Reject a token whose `alg` can never verify against `policy`'s kind
    /// of key. Needs no key material, so it runs before key resolution.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::BadSignature` on a key family mismatch.
    pub fn check_algorithm(
        &self,
        token: &ParsedToken<'_>,
        policy: &IssuerPolicy,
    ) -> Result<(), ValidationError> {
        let symmetric = matches!(policy.kind(), IssuerKind::Symmetric { .. });
        check_key_family(token.algorithm, symmetric)
    }

    /// Validate an already parsed token.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as a `ValidationError`.
    pub fn validate_parsed(
        &self,
        token: &ParsedToken<'_>,
        policy: &IssuerPolicy,
        key_material: &KeyMaterial,
        now: DateTime<Utc>,
    ) -> Result<ValidatedClaims, ValidationError> {
        verify_signature(token, key_material)?;

        // Issuer
        let issuer_matches = token
            .issuer()
            .is_some_and(|iss| normalize_issuer(iss) == normalize_issuer(policy.issuer()));
        if !issuer_matches {
            return Err(ValidationError::IssuerMismatch);
        }

        // Audience
        let audience_claim: Option<AudienceClaim> = token
            .payload
            .get("aud")
            .and_then(|aud| serde_json::from_value(aud.clone()).ok());
        let audience = audience_claim
            .as_ref()
            .and_then(|claim| policy.audiences().iter().find(|a| claim.contains(a)))
            .ok_or(ValidationError::AudienceMismatch)?;

        // Lifetime
        #[allow(clippy::cast_possible_wrap)]
        let skew = policy.clock_skew().as_secs() as i64;
        let now_ts = now.timestamp();

        let exp = token.expires.ok_or(ValidationError::Expired)?;
        if now_ts > exp.saturating_add(skew) {
            return Err(ValidationError::Expired);
        }
        if let Some(nbf) = token.not_before {
            if nbf > now_ts.saturating_add(skew) {
                return Err(ValidationError::NotYetValid);
            }
        }
        if let Some(iat) = token.issued_at {
            validate_iat_at(iat, policy.clock_skew(), now_ts)?;
        }

        Ok(ValidatedClaims::from_payload(
            token.subject.clone(),
            &token.payload,
            policy.name(),
            audience,
            DateTime::from_timestamp(exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC),
            token
                .issued_at
                .and_then(|iat| DateTime::from_timestamp(iat, 0)),
        ))
    }
}

fn verify_signature(token: &ParsedToken<'_>, key_material: &KeyMaterial) -> Result<(), ValidationError> {
    let alg = token.algorithm;
    match key_material {
        KeyMaterial::Symmetric(key) => {
            check_key_family(alg, true)?;
            verify_with(token, key, alg)
        }
        KeyMaterial::Asymmetric(snapshot) => {
            check_key_family(alg, false)?;
            verify_with_snapshot(token, snapshot, alg)
        }
    }
}

/// HMAC algorithms only fit symmetric issuers; everything else only fits
/// discovery issuers.
fn check_key_family(alg: Algorithm, symmetric: bool) -> Result<(), ValidationError> {
    let hmac = KeyFamily::for_algorithm(alg) == KeyFamily::Hmac;
    match (symmetric, hmac) {
        (true, false) => Err(ValidationError::BadSignature(format!(
            "{alg:?} not allowed for symmetric issuer"
        ))),
        (false, true) => Err(ValidationError::BadSignature(format!(
            "{alg:?} not allowed for discovery issuer"
        ))),
        _ => Ok(()),
    }
}

fn verify_with_snapshot(
    token: &ParsedToken<'_>,
    snapshot: &KeySnapshot,
    alg: Algorithm,
) -> Result<(), ValidationError> {
    if let Some(kid) = token.kid() {
        let key = snapshot
            .find_by_kid(kid)
            .ok_or_else(|| ValidationError::BadSignature("unknown kid".to_string()))?;
        if !key.accepts(alg) {
            return Err(ValidationError::BadSignature(format!(
                "key does not accept {alg:?}"
            )));
        }
        return verify_with(token, key.decoding_key(), alg);
    }

    let verified = snapshot
        .keys()
        .iter()
        .filter(|key| key.accepts(alg))
        .any(|key| verify_with(token, key.decoding_key(), alg).is_ok());

    if verified {
        Ok(())
    } else {
        Err(ValidationError::BadSignature(
            "no compatible key verified the signature".to_string(),
        ))
    }
}

fn verify_with(
    token: &ParsedToken<'_>,
    key: &DecodingKey,
    alg: Algorithm,
) -> Result<(), ValidationError> {
    match jsonwebtoken::crypto::verify(
        token.parts.signature,
        token.parts.signing_input.as_bytes(),
        key,
        alg,
    ) {
        Ok(true) => Ok(()),
        Ok(false) => Err(ValidationError::BadSignature(
            "signature mismatch".to_string(),
        )),
        Err(e) => Err(ValidationError::BadSignature(format!(
            "signature not verifiable: {e}"
        ))),
    }
}
