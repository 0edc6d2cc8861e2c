//! JWKS and OIDC discovery wire formats.
//!
//! Keys are converted to [`VerificationKey`]s once, when a key set is
//! fetched, so signature checks never re-parse JWK parameters.
//!
//! # Security
//!
//! - Keys with `use` other than `sig` are ignored
//! - A key's declared `alg`, when present, pins it to that algorithm
//! - Unusable keys are skipped individually; one bad entry does not poison
//!   the rest of the set

use chrono::{DateTime, Utc};
use common::jwt::decode_ed25519_public_key_jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Ed25519 public keys are always 32 bytes.
const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Subset of the OpenID Provider metadata document that is needed here.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier advertised by the provider.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Location of the provider's key set.
    pub jwks_uri: String,
}

/// JSON Web Key as published in a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type: `RSA`, `EC` or `OKP`.
    pub kty: String,

    /// Key ID.
    #[serde(default)]
    pub kid: Option<String>,

    /// Algorithm the key is intended for.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (`sig` for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve for EC and OKP keys.
    #[serde(default)]
    pub crv: Option<String>,

    /// EC x coordinate, or the OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default)]
    pub y: Option<String>,
}

/// JWKS document. Entries are kept as raw JSON so that a single entry with
/// an unexpected shape can be skipped without rejecting the whole set.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<serde_json::Value>,
}

/// Reasons a JWK cannot be used for verification.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JwkError {
    #[error("key use '{0}' is not 'sig'")]
    NotForSigning(String),

    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    #[error("unsupported curve '{0}'")]
    UnsupportedCurve(String),

    #[error("missing parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("invalid key parameters: {0}")]
    InvalidParameter(String),

    #[error("unsupported algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("algorithm '{alg}' does not match key type '{kty}'")]
    AlgorithmMismatch { alg: String, kty: String },
}

/// Family of keys an algorithm verifies with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// Shared secret (HS256/384/512).
    Hmac,
    /// RSA public key (RS*, PS*).
    Rsa,
    /// Elliptic curve public key (ES256/384).
    Ec,
    /// Octet key pair (EdDSA).
    Okp,
}

impl KeyFamily {
    /// Key family required by `alg`.
    #[must_use]
    pub fn for_algorithm(alg: Algorithm) -> Self {
        match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Hmac,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => KeyFamily::Rsa,
            Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
            Algorithm::EdDSA => KeyFamily::Okp,
        }
    }
}

/// A prepared public key from an issuer's JWKS.
#[derive(Clone)]
pub struct VerificationKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    family: KeyFamily,
    key: DecodingKey,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Convert a JWK into a verification key.
    ///
    /// # Errors
    ///
    /// Returns `JwkError` if the key is not a signing key, has an unsupported
    /// type or curve, is missing parameters, or declares an algorithm that
    /// does not fit its type.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwkError> {
        if let Some(key_use) = &jwk.key_use {
            if key_use != "sig" {
                return Err(JwkError::NotForSigning(key_use.clone()));
            }
        }

        let algorithm = jwk
            .alg
            .as_deref()
            .map(|alg| {
                Algorithm::from_str(alg).map_err(|_| JwkError::UnsupportedAlgorithm(alg.to_string()))
            })
            .transpose()?;

        let (family, key) = match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_deref().ok_or(JwkError::MissingParameter("n"))?;
                let e = jwk.e.as_deref().ok_or(JwkError::MissingParameter("e"))?;
                let key = DecodingKey::from_rsa_components(n, e)
                    .map_err(|e| JwkError::InvalidParameter(e.to_string()))?;
                (KeyFamily::Rsa, key)
            }
            "EC" => {
                match jwk.crv.as_deref() {
                    Some("P-256" | "P-384") => {}
                    Some(other) => return Err(JwkError::UnsupportedCurve(other.to_string())),
                    None => return Err(JwkError::MissingParameter("crv")),
                }
                let x = jwk.x.as_deref().ok_or(JwkError::MissingParameter("x"))?;
                let y = jwk.y.as_deref().ok_or(JwkError::MissingParameter("y"))?;
                let key = DecodingKey::from_ec_components(x, y)
                    .map_err(|e| JwkError::InvalidParameter(e.to_string()))?;
                (KeyFamily::Ec, key)
            }
            "OKP" => {
                match jwk.crv.as_deref() {
                    Some("Ed25519") => {}
                    Some(other) => return Err(JwkError::UnsupportedCurve(other.to_string())),
                    None => return Err(JwkError::MissingParameter("crv")),
                }
                let x = jwk.x.as_deref().ok_or(JwkError::MissingParameter("x"))?;
                let bytes = decode_ed25519_public_key_jwk(x)
                    .map_err(|e| JwkError::InvalidParameter(e.to_string()))?;
                if bytes.len() != ED25519_PUBLIC_KEY_LEN {
                    return Err(JwkError::InvalidParameter(format!(
                        "Ed25519 key is {} bytes, expected {ED25519_PUBLIC_KEY_LEN}",
                        bytes.len()
                    )));
                }
                (KeyFamily::Okp, DecodingKey::from_ed_der(&bytes))
            }
            other => return Err(JwkError::UnsupportedKeyType(other.to_string())),
        };

        if let Some(alg) = algorithm {
            if KeyFamily::for_algorithm(alg) != family {
                return Err(JwkError::AlgorithmMismatch {
                    alg: format!("{alg:?}"),
                    kty: jwk.kty.clone(),
                });
            }
        }

        Ok(Self {
            kid: jwk.kid.clone().filter(|k| !k.is_empty()),
            algorithm,
            family,
            key,
        })
    }

    #[must_use]
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Algorithm the key is pinned to, if the JWK declared one.
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    #[must_use]
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Whether this key may verify a signature made with `alg`.
    #[must_use]
    pub fn accepts(&self, alg: Algorithm) -> bool {
        if KeyFamily::for_algorithm(alg) != self.family {
            return false;
        }
        match self.algorithm {
            Some(pinned) => pinned == alg,
            None => true,
        }
    }
}

/// Immutable set of verification keys fetched for one issuer.
///
/// A snapshot is replaced wholesale on refresh; readers holding an `Arc`
/// to an older snapshot keep a consistent view.
#[derive(Debug, Clone)]
pub struct KeySnapshot {
    keys: Vec<VerificationKey>,
    fetched_at: Instant,
    fetched_at_utc: DateTime<Utc>,
    ttl: Duration,
}

impl KeySnapshot {
    /// Create a snapshot fetched now.
    #[must_use]
    pub fn new(keys: Vec<VerificationKey>, ttl: Duration) -> Self {
        Self::fetched_at(keys, ttl, Instant::now(), Utc::now())
    }

    /// Create a snapshot with explicit fetch timestamps.
    #[must_use]
    pub fn fetched_at(
        keys: Vec<VerificationKey>,
        ttl: Duration,
        fetched_at: Instant,
        fetched_at_utc: DateTime<Utc>,
    ) -> Self {
        Self {
            keys,
            fetched_at,
            fetched_at_utc,
            ttl,
        }
    }

    /// Convert a fetched JWKS document, skipping entries that cannot be used.
    #[must_use]
    pub fn from_document(issuer_name: &str, document: JwksDocument, ttl: Duration) -> Self {
        let total = document.keys.len();
        let keys: Vec<VerificationKey> = document
            .keys
            .into_iter()
            .filter_map(|raw| {
                let jwk: Jwk = match serde_json::from_value(raw) {
                    Ok(jwk) => jwk,
                    Err(e) => {
                        tracing::warn!(
                            target: "idv.keys.jwks",
                            issuer_name = %issuer_name,
                            error = %e,
                            "Skipping unparseable JWKS entry"
                        );
                        return None;
                    }
                };
                match VerificationKey::from_jwk(&jwk) {
                    Ok(key) => Some(key),
                    Err(e) => {
                        tracing::warn!(
                            target: "idv.keys.jwks",
                            issuer_name = %issuer_name,
                            kid = ?jwk.kid,
                            kty = %jwk.kty,
                            error = %e,
                            "Skipping unusable JWKS key"
                        );
                        None
                    }
                }
            })
            .collect();

        tracing::debug!(
            target: "idv.keys.jwks",
            issuer_name = %issuer_name,
            usable = keys.len(),
            total = total,
            "Converted JWKS document"
        );

        Self::new(keys, ttl)
    }

    #[must_use]
    pub fn keys(&self) -> &[VerificationKey] {
        &self.keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn contains_kid(&self, kid: &str) -> bool {
        self.find_by_kid(kid).is_some()
    }

    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.iter().find(|k| k.kid() == Some(kid))
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn fetched_at_utc(&self) -> DateTime<Utc> {
        self.fetched_at_utc
    }

    /// Wall-clock time at which the snapshot stops being fresh.
    #[must_use]
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.fetched_at_utc.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }

    /// Fresh snapshots are served without contacting the issuer.
    #[must_use]
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        self.age(now) < self.ttl
    }

    /// Whether a stale snapshot may still be served after a failed refresh.
    #[must_use]
    pub fn is_within_grace_at(&self, now: Instant, grace: Duration) -> bool {
        self.age(now) < self.ttl.saturating_add(grace)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde_json::json;

    fn okp_jwk(kid: &str) -> serde_json::Value {
        json!({
            "kty": "OKP",
            "kid": kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode([7u8; 32]),
            "alg": "EdDSA",
            "use": "sig"
        })
    }

    fn parse(value: serde_json::Value) -> Jwk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_discovery_document_deserialization() {
        let doc: DiscoveryDocument = serde_json::from_str(
            r#"{"issuer":"https://login.example/v2.0","jwks_uri":"https://login.example/keys","token_endpoint":"x"}"#,
        )
        .unwrap();
        assert_eq!(doc.jwks_uri, "https://login.example/keys");
        assert_eq!(doc.issuer.as_deref(), Some("https://login.example/v2.0"));
    }

    #[test]
    fn test_okp_key_conversion() {
        let key = VerificationKey::from_jwk(&parse(okp_jwk("ed-1"))).unwrap();
        assert_eq!(key.kid(), Some("ed-1"));
        assert_eq!(key.family(), KeyFamily::Okp);
        assert_eq!(key.algorithm(), Some(Algorithm::EdDSA));
        assert!(key.accepts(Algorithm::EdDSA));
        assert!(!key.accepts(Algorithm::RS256));
    }

    #[test]
    fn test_rsa_key_without_alg_accepts_rsa_family() {
        let jwk = parse(json!({
            "kty": "RSA",
            "kid": "rsa-1",
            "n": URL_SAFE_NO_PAD.encode([0xC5u8; 256]),
            "e": "AQAB"
        }));
        let key = VerificationKey::from_jwk(&jwk).unwrap();
        assert_eq!(key.family(), KeyFamily::Rsa);
        assert!(key.accepts(Algorithm::RS256));
        assert!(key.accepts(Algorithm::PS384));
        assert!(!key.accepts(Algorithm::ES256));
        assert!(!key.accepts(Algorithm::HS256));
    }

    #[test]
    fn test_pinned_alg_rejects_other_algorithms_in_family() {
        let jwk = parse(json!({
            "kty": "RSA",
            "kid": "rsa-1",
            "alg": "RS256",
            "n": URL_SAFE_NO_PAD.encode([0xC5u8; 256]),
            "e": "AQAB"
        }));
        let key = VerificationKey::from_jwk(&jwk).unwrap();
        assert!(key.accepts(Algorithm::RS256));
        assert!(!key.accepts(Algorithm::RS512));
    }

    #[test]
    fn test_encryption_key_rejected() {
        let mut value = okp_jwk("enc");
        value["use"] = json!("enc");
        assert_eq!(
            VerificationKey::from_jwk(&parse(value)).unwrap_err(),
            JwkError::NotForSigning("enc".to_string())
        );
    }

    #[test]
    fn test_unsupported_key_types_and_curves() {
        let oct = parse(json!({"kty": "oct", "k": "c2VjcmV0"}));
        assert!(matches!(
            VerificationKey::from_jwk(&oct),
            Err(JwkError::UnsupportedKeyType(_))
        ));

        let x448 = parse(json!({"kty": "OKP", "crv": "X448", "x": "AAAA"}));
        assert!(matches!(
            VerificationKey::from_jwk(&x448),
            Err(JwkError::UnsupportedCurve(_))
        ));
    }

    #[test]
    fn test_missing_and_invalid_parameters() {
        let rsa = parse(json!({"kty": "RSA", "e": "AQAB"}));
        assert_eq!(
            VerificationKey::from_jwk(&rsa).unwrap_err(),
            JwkError::MissingParameter("n")
        );

        let short = parse(json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode([1u8; 16])
        }));
        assert!(matches!(
            VerificationKey::from_jwk(&short),
            Err(JwkError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_algorithm_must_fit_key_type() {
        let mut value = okp_jwk("ed");
        value["alg"] = json!("RS256");
        assert!(matches!(
            VerificationKey::from_jwk(&parse(value)),
            Err(JwkError::AlgorithmMismatch { .. })
        ));

        let mut value = okp_jwk("ed");
        value["alg"] = json!("none");
        assert!(matches!(
            VerificationKey::from_jwk(&parse(value)),
            Err(JwkError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_snapshot_skips_unusable_entries() {
        let document = JwksDocument {
            keys: vec![
                okp_jwk("good-1"),
                json!({"kty": "oct", "k": "c2VjcmV0"}),
                json!({"no_kty": true}),
                okp_jwk("good-2"),
            ],
        };

        let snapshot = KeySnapshot::from_document("test", document, Duration::from_secs(60));
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_kid("good-1"));
        assert!(snapshot.contains_kid("good-2"));
        assert!(!snapshot.contains_kid("missing"));
    }

    #[test]
    fn test_snapshot_freshness_and_grace() {
        let ttl = Duration::from_secs(60);
        let now = Instant::now();
        let fetched = now.checked_sub(Duration::from_secs(90)).unwrap();
        let snapshot = KeySnapshot::fetched_at(vec![], ttl, fetched, Utc::now());

        assert!(!snapshot.is_fresh_at(now));
        assert!(snapshot.is_within_grace_at(now, Duration::from_secs(60)));
        assert!(!snapshot.is_within_grace_at(now, Duration::from_secs(10)));
        assert!(!snapshot.is_within_grace_at(now, Duration::ZERO));
    }

    #[test]
    fn test_snapshot_expires_at_utc() {
        let fetched = Utc::now();
        let snapshot =
            KeySnapshot::fetched_at(vec![], Duration::from_secs(3600), Instant::now(), fetched);
        assert_eq!(
            snapshot.expires_at_utc(),
            fetched + chrono::Duration::seconds(3600)
        );
    }
}
