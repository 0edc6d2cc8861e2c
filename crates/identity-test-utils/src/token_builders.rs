//! Builder patterns for test claims and tokens.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Builder for JWT claims.
///
/// Defaults: subject `test-subject`, issued now, valid for one hour.
///
/// ```rust,ignore
/// let claims = TestClaimsBuilder::new("https://localhost:5001", "api://primus-test-app")
///     .for_user("u1")
///     .with_roles(&["Admin"])
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestClaimsBuilder {
    claims: Map<String, Value>,
}

impl TestClaimsBuilder {
    pub fn new(issuer: &str, audience: &str) -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("test-subject"));
        claims.insert("iss".to_string(), json!(issuer));
        claims.insert("aud".to_string(), json!(audience));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );
        Self { claims }
    }

    /// Set the subject.
    pub fn for_user(self, subject: &str) -> Self {
        self.with_claim("sub", json!(subject))
    }

    /// Replace `aud` with a single audience.
    pub fn with_audience(self, audience: &str) -> Self {
        self.with_claim("aud", json!(audience))
    }

    /// Set `exp` relative to now; negative values produce an expired token.
    pub fn expires_in(self, seconds: i64) -> Self {
        let exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self.with_claim("exp", json!(exp))
    }

    /// Set `exp` to an absolute timestamp.
    pub fn expires_at(self, timestamp: i64) -> Self {
        self.with_claim("exp", json!(timestamp))
    }

    /// Set `iat` to an absolute timestamp.
    pub fn issued_at(self, timestamp: i64) -> Self {
        self.with_claim("iat", json!(timestamp))
    }

    pub fn with_email(self, email: &str) -> Self {
        self.with_claim("email", json!(email))
    }

    pub fn with_name(self, name: &str) -> Self {
        self.with_claim("name", json!(name))
    }

    pub fn with_tenant(self, tenant_id: &str) -> Self {
        self.with_claim("tid", json!(tenant_id))
    }

    pub fn with_roles(self, roles: &[&str]) -> Self {
        self.with_claim("roles", json!(roles))
    }

    /// Set any claim.
    pub fn with_claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim.
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.claims)
    }
}

/// Sign `claims` as an HS256 JWT with `secret`.
pub fn sign_hs256<T: Serialize>(claims: &T, secret: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.typ = Some("JWT".to_string());
    encode(&header, claims, &EncodingKey::from_secret(secret.as_bytes()))
        .expect("Failed to sign HS256 token")
}

/// Flip one bit in the first byte of the token's signature.
pub fn tamper_signature(token: &str) -> String {
    let (signing_input, signature) = token.rsplit_once('.').expect("token has no signature");
    let mut chars: Vec<char> = signature.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    format!("{signing_input}.{}", chars.into_iter().collect::<String>())
}
