//! JWT utilities shared across identity validator components.
//!
//! This module provides the pre-verification half of JWT handling:
//! - Size limits for DoS prevention
//! - Clock skew constants
//! - Compact-serialization splitting (JWS vs JWE detection)
//! - Unverified peeking at `iss` for issuer selection
//! - iat validation logic
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing returned by `peek_issuer` is trusted: it only orders candidate
//!   issuers. The signature is always
//!   verified afterwards against the selected issuer's keys.
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{decode_json_segment, split_compact, validate_iat_at, DEFAULT_CLOCK_SKEW};
//!
//! let parts = split_compact(token)?;
//! let header = decode_json_segment(parts.header)?;
//!
//! // After signature verification, validate iat
//! validate_iat_at(iat, DEFAULT_CLOCK_SKEW, now)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations. Typical access tokens are well under 2KB, even with Entra ID
/// group and role claims.
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes).
///
/// Applied to `exp`, `nbf` and `iat` checks to absorb clock drift between
/// the issuer and this host.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Configuration above this value is rejected at startup.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Number of segments in a JWS compact serialization.
const JWS_SEGMENTS: usize = 3;

/// Number of segments in a JWE compact serialization.
const JWE_SEGMENTS: usize = 5;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while inspecting a JWT before signature verification.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token is a five-segment JWE; no decryption keys are configured.
    #[error("The access token is invalid or expired")]
    EncryptedToken,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Compact Serialization
// =============================================================================

/// The three segments of a JWS compact serialization, still base64url encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactParts<'a> {
    /// Encoded protected header.
    pub header: &'a str,

    /// Encoded payload.
    pub payload: &'a str,

    /// Encoded signature (may be empty; verification will reject it).
    pub signature: &'a str,

    /// `header.payload`, the exact bytes covered by the signature.
    pub signing_input: &'a str,
}

/// Split a token into its JWS segments.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `EncryptedToken` - Token has five segments (JWE)
/// - `MalformedToken` - Any other segment count, or an empty header/payload
pub fn split_compact(token: &str) -> Result<CompactParts<'_>, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let segments = token.split('.').count();
    if segments == JWE_SEGMENTS {
        tracing::debug!(target: "common.jwt", "Token rejected: encrypted (JWE) tokens are not supported");
        return Err(JwtValidationError::EncryptedToken);
    }
    if segments != JWS_SEGMENTS {
        tracing::debug!(
            target: "common.jwt",
            parts = segments,
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let (signing_input, signature) = token
        .rsplit_once('.')
        .ok_or(JwtValidationError::MalformedToken)?;
    let (header, payload) = signing_input
        .split_once('.')
        .ok_or(JwtValidationError::MalformedToken)?;

    if header.is_empty() || payload.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty header or payload segment");
        return Err(JwtValidationError::MalformedToken);
    }

    Ok(CompactParts {
        header,
        payload,
        signature,
        signing_input,
    })
}

/// Decode one base64url segment and parse it as a JSON object.
///
/// # Errors
///
/// Returns `MalformedToken` if the segment is not base64url, not JSON, or
/// not a JSON object.
pub fn decode_json_segment(
    segment: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, JwtValidationError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT segment base64");
        JwtValidationError::MalformedToken
    })?;

    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => {
            tracing::debug!(target: "common.jwt", "JWT segment is not a JSON object");
            Err(JwtValidationError::MalformedToken)
        }
        Err(e) => {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT segment JSON");
            Err(JwtValidationError::MalformedToken)
        }
    }
}

// =============================================================================
// Unverified Peeking
// =============================================================================

/// Extract the `iss` claim from a JWT payload without verifying the signature.
///
/// Returns `None` for anything that cannot be read; the caller falls back to
/// trying every configured issuer.
#[must_use]
pub fn peek_issuer(token: &str) -> Option<String> {
    let parts = split_compact(token).ok()?;
    let payload = decode_json_segment(parts.payload).ok()?;

    payload
        .get("iss")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Normalize an issuer string for comparison.
///
/// Issuers are compared exactly except for a single trailing `/`, which
/// discovery documents and hand-written configuration disagree on.
#[must_use]
pub fn normalize_issuer(issuer: &str) -> &str {
    issuer.strip_suffix('/').unwrap_or(issuer)
}

// =============================================================================
// Claim Checks
// =============================================================================

/// Deterministic `iat` validation against an explicit `now` timestamp.
///
/// Rejects tokens with `iat` more than `clock_skew` in the future, which
/// indicates pre-generated tokens or badly skewed issuer clocks.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds), well within i64 range
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Decode an Ed25519 public key from JWK `x` field (base64url format).
///
/// The `x` field in an OKP (Octet Key Pair) JWK contains the public key
/// in base64url encoding without padding.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the base64url content cannot be decoded.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn token_with(header: &str, payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    // -------------------------------------------------------------------------
    // Constants Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_max_jwt_size_is_8kb() {
        assert_eq!(MAX_JWT_SIZE_BYTES, 8192);
    }

    #[test]
    fn test_default_clock_skew_is_5_minutes() {
        assert_eq!(DEFAULT_CLOCK_SKEW, Duration::from_secs(300));
    }

    // -------------------------------------------------------------------------
    // split_compact Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_split_compact_valid_token() {
        let parts = split_compact("aGVhZA.cGF5bG9hZA.c2ln").unwrap();
        assert_eq!(parts.header, "aGVhZA");
        assert_eq!(parts.payload, "cGF5bG9hZA");
        assert_eq!(parts.signature, "c2ln");
        assert_eq!(parts.signing_input, "aGVhZA.cGF5bG9hZA");
    }

    #[test]
    fn test_split_compact_allows_empty_signature() {
        let parts = split_compact("aGVhZA.cGF5bG9hZA.").unwrap();
        assert!(parts.signature.is_empty());
    }

    #[test]
    fn test_split_compact_rejects_wrong_segment_count() {
        assert_eq!(
            split_compact("only.two"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(
            split_compact("a.b.c.d"),
            Err(JwtValidationError::MalformedToken)
        );
        assert_eq!(split_compact(""), Err(JwtValidationError::MalformedToken));
    }

    #[test]
    fn test_split_compact_detects_jwe() {
        assert_eq!(
            split_compact("a.b.c.d.e"),
            Err(JwtValidationError::EncryptedToken)
        );
    }

    #[test]
    fn test_split_compact_rejects_empty_header() {
        assert_eq!(
            split_compact(".payload.signature"),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_split_compact_oversized_token() {
        let oversized = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(
            split_compact(&oversized),
            Err(JwtValidationError::TokenTooLarge)
        );
    }

    #[test]
    fn test_split_compact_at_size_limit() {
        let remaining = MAX_JWT_SIZE_BYTES - 2;
        let token = format!(
            "{}.{}.{}",
            "a".repeat(remaining / 2),
            "b".repeat(remaining - remaining / 2 - 1),
            "c"
        );
        assert_eq!(token.len(), MAX_JWT_SIZE_BYTES);
        assert!(split_compact(&token).is_ok());
    }

    // -------------------------------------------------------------------------
    // decode_json_segment Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_json_segment_object() {
        let segment = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#);
        let map = decode_json_segment(&segment).unwrap();
        assert_eq!(map.get("alg").and_then(|v| v.as_str()), Some("HS256"));
    }

    #[test]
    fn test_decode_json_segment_rejects_non_object() {
        let segment = URL_SAFE_NO_PAD.encode("[1,2,3]");
        assert_eq!(
            decode_json_segment(&segment),
            Err(JwtValidationError::MalformedToken)
        );
    }

    #[test]
    fn test_decode_json_segment_rejects_invalid_base64() {
        assert_eq!(
            decode_json_segment("!!!invalid!!!"),
            Err(JwtValidationError::MalformedToken)
        );
    }

    // -------------------------------------------------------------------------
    // peek_issuer Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_peek_issuer() {
        let token = token_with(
            r#"{"alg":"HS256"}"#,
            r#"{"iss":"https://localhost:5001","sub":"u1"}"#,
        );
        assert_eq!(
            peek_issuer(&token),
            Some("https://localhost:5001".to_string())
        );
    }

    #[test]
    fn test_peek_issuer_missing_or_garbage() {
        let token = token_with(r#"{"alg":"HS256"}"#, r#"{"sub":"u1"}"#);
        assert_eq!(peek_issuer(&token), None);
        assert_eq!(peek_issuer("garbage"), None);
    }

    #[test]
    fn test_normalize_issuer() {
        assert_eq!(normalize_issuer("https://a.example/"), "https://a.example");
        assert_eq!(normalize_issuer("https://a.example"), "https://a.example");
        assert_eq!(normalize_issuer("https://a.example//"), "https://a.example/");
    }

    // -------------------------------------------------------------------------
    // validate_iat_at Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_validate_iat_past_time() {
        let now = 1_700_000_000_i64;
        assert!(validate_iat_at(now - 3600, DEFAULT_CLOCK_SKEW, now).is_ok());
    }

    #[test]
    fn test_validate_iat_at_boundary_exact() {
        let now = 1_700_000_000_i64;

        // iat == now + skew is the last accepted value
        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());

        // iat == now + skew + 1 is the first rejected value
        assert!(matches!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now),
            Err(JwtValidationError::IatTooFarInFuture)
        ));
    }

    // -------------------------------------------------------------------------
    // Key Decoding Tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_ed25519_public_key_jwk() {
        let x = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";
        let result = decode_ed25519_public_key_jwk(x);
        assert_eq!(result.unwrap().len(), 32); // Ed25519 public key is 32 bytes
    }

    #[test]
    fn test_decode_ed25519_public_key_jwk_invalid() {
        assert!(decode_ed25519_public_key_jwk("not-valid-base64url!!!").is_err());
    }
}
