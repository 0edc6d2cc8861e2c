//! Claims of a successfully validated token.
//!
//! Subject and email identify a person; both are redacted in Debug output.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Claim names that carry roles, in collection order.
pub const ROLE_CLAIMS: [&str; 3] = [
    "roles",
    "role",
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/role",
];

/// Claims accepted by one issuer for one token.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedClaims {
    /// `sub` claim.
    pub subject: String,

    /// `email` claim, if present and non-empty.
    pub email: Option<String>,

    /// `name` claim, if present and non-empty.
    pub display_name: Option<String>,

    /// Every payload claim flattened to a string, sorted by name.
    pub claims: BTreeMap<String, String>,

    /// Names of claims that were JSON strings before flattening.
    #[serde(skip)]
    pub string_claims: BTreeSet<String>,

    /// Roles from all role claims, de-duplicated, in first-seen order.
    pub roles: Vec<String>,

    /// Name of the issuer policy that accepted the token.
    pub issuer_name: String,

    /// Configured audience that matched.
    pub audience: String,

    pub expires_at: DateTime<Utc>,

    pub issued_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for ValidatedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedClaims")
            .field("subject", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("display_name", &self.display_name)
            .field("claims", &self.claims.keys().collect::<Vec<_>>())
            .field("roles", &self.roles)
            .field("issuer_name", &self.issuer_name)
            .field("audience", &self.audience)
            .field("expires_at", &self.expires_at)
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

impl ValidatedClaims {
    /// Build from a verified payload.
    #[must_use]
    pub fn from_payload(
        subject: String,
        payload: &Map<String, Value>,
        issuer_name: &str,
        audience: &str,
        expires_at: DateTime<Utc>,
        issued_at: Option<DateTime<Utc>>,
    ) -> Self {
        let claims: BTreeMap<String, String> = payload
            .iter()
            .map(|(name, value)| (name.clone(), flatten_claim(value)))
            .collect();
        let string_claims = payload
            .iter()
            .filter(|(_, value)| value.is_string())
            .map(|(name, _)| name.clone())
            .collect();

        Self {
            subject,
            email: non_empty_string(payload.get("email")),
            display_name: non_empty_string(payload.get("name")),
            claims,
            string_claims,
            roles: collect_roles(payload),
            issuer_name: issuer_name.to_string(),
            audience: audience.to_string(),
            expires_at,
            issued_at,
        }
    }

    /// Flattened value of a claim; empty values are treated as absent.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.claims
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Like [`claim`](Self::claim), but only for claims that were strings.
    #[must_use]
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.claim(name)
            .filter(|_| self.string_claims.contains(name))
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Strings as-is, arrays joined with `,`, null as empty, anything else as JSON.
fn flatten_claim(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(flatten_claim)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn collect_roles(payload: &Map<String, Value>) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    let mut push = |role: &str| {
        let role = role.trim();
        if !role.is_empty() && !roles.iter().any(|r| r == role) {
            roles.push(role.to_string());
        }
    };

    for name in ROLE_CLAIMS {
        match payload.get(name) {
            Some(Value::String(value)) => value.split(',').for_each(&mut push),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .for_each(&mut push),
            _ => {}
        }
    }
    roles
}
