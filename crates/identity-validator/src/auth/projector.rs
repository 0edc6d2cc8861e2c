//! Projection of validated claims into user and tenant contexts.
//!
//! All claim-name fallback chains live here. Each chain is tried in order;
//! empty values count as absent. Email and name chains only take string
//! claims.

use crate::auth::claims::ValidatedClaims;
use serde::Serialize;
use std::collections::BTreeMap;

/// Tenant used when no tenant claim is present.
pub const DEFAULT_TENANT_ID: &str = "default";

/// Email used when no email claim is present.
pub const UNKNOWN_EMAIL: &str = "unknown@example.com";

const DEFAULT_TENANT_CLAIMS: [&str; 3] = [
    "tid",
    "tenantId",
    "http://schemas.microsoft.com/identity/claims/tenantid",
];

const DEFAULT_EMAIL_CLAIMS: [&str; 2] = ["email", "preferred_username"];

const DEFAULT_NAME_CLAIMS: [&str; 1] = ["name"];

/// Who the caller is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_id: String,
    pub email: String,
    /// False when `email` is the [`UNKNOWN_EMAIL`] placeholder.
    pub email_resolved: bool,
    pub display_name: String,
    pub roles: Vec<String>,
    pub issuer_name: String,
    pub claims: BTreeMap<String, String>,
}

/// Which tenant the caller acts for, and with which roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub tenant_id: String,
    pub roles: Vec<String>,
}

impl TenantContext {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Maps [`ValidatedClaims`] to [`UserContext`] and [`TenantContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsProjector {
    tenant_claims: Vec<String>,
    email_claims: Vec<String>,
    name_claims: Vec<String>,
}

impl Default for ClaimsProjector {
    fn default() -> Self {
        Self {
            tenant_claims: to_owned(&DEFAULT_TENANT_CLAIMS),
            email_claims: to_owned(&DEFAULT_EMAIL_CLAIMS),
            name_claims: to_owned(&DEFAULT_NAME_CLAIMS),
        }
    }
}

fn to_owned(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

impl ClaimsProjector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the tenant id claim chain.
    #[must_use]
    pub fn with_tenant_claims<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tenant_claims = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the email claim chain.
    #[must_use]
    pub fn with_email_claims<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.email_claims = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the display name claim chain.
    #[must_use]
    pub fn with_name_claims<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_claims = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn tenant_claims(&self) -> &[String] {
        &self.tenant_claims
    }

    #[must_use]
    pub fn email_claims(&self) -> &[String] {
        &self.email_claims
    }

    #[must_use]
    pub fn name_claims(&self) -> &[String] {
        &self.name_claims
    }

    /// Project validated claims. Pure: the same input always yields the
    /// same output.
    #[must_use]
    pub fn project(&self, claims: &ValidatedClaims) -> (UserContext, TenantContext) {
        let tenant_id = first_claim(claims, &self.tenant_claims)
            .unwrap_or(DEFAULT_TENANT_ID)
            .to_string();

        let resolved_email = first_string_claim(claims, &self.email_claims);
        let email = resolved_email.unwrap_or(UNKNOWN_EMAIL).to_string();

        let display_name = first_string_claim(claims, &self.name_claims)
            .map(ToString::to_string)
            .unwrap_or_else(|| local_part(&email).to_string());

        let user = UserContext {
            user_id: claims.subject.clone(),
            email,
            email_resolved: resolved_email.is_some(),
            display_name,
            roles: claims.roles.clone(),
            issuer_name: claims.issuer_name.clone(),
            claims: claims.claims.clone(),
        };

        let tenant = TenantContext {
            tenant_id,
            roles: claims.roles.clone(),
        };

        (user, tenant)
    }
}

fn first_claim<'a>(claims: &'a ValidatedClaims, names: &[String]) -> Option<&'a str> {
    names.iter().find_map(|name| claims.claim(name))
}

fn first_string_claim<'a>(claims: &'a ValidatedClaims, names: &[String]) -> Option<&'a str> {
    names.iter().find_map(|name| claims.string_claim(name))
}

fn local_part(email: &str) -> &str {
    email
        .split_once('@')
        .map_or(email, |(local, _)| local)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use serde_json::{json, Value};

    fn validated(payload: Value) -> ValidatedClaims {
        let map = payload.as_object().cloned().unwrap();
        ValidatedClaims::from_payload(
            "u1".to_string(),
            &map,
            "LocalAuth",
            "api://primus-test-app",
            DateTime::from_timestamp(1_700_003_600, 0).unwrap(),
            None,
        )
    }

    #[test]
    fn test_full_projection() {
        let claims = validated(json!({
            "sub": "u1",
            "email": "ann@example.com",
            "name": "Ann Example",
            "tid": "tenant-42",
            "roles": ["Admin", "User"]
        }));

        let (user, tenant) = ClaimsProjector::new().project(&claims);
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.email, "ann@example.com");
        assert!(user.email_resolved);
        assert_eq!(user.display_name, "Ann Example");
        assert_eq!(user.roles, ["Admin", "User"]);
        assert_eq!(user.issuer_name, "LocalAuth");
        assert_eq!(tenant.tenant_id, "tenant-42");
        assert!(tenant.has_role("Admin"));
    }

    #[test]
    fn test_missing_tenant_defaults() {
        let claims = validated(json!({"sub": "u1"}));
        let (user, tenant) = ClaimsProjector::new().project(&claims);

        assert_eq!(tenant.tenant_id, DEFAULT_TENANT_ID);
        assert!(tenant.roles.is_empty());
        assert_eq!(user.email, UNKNOWN_EMAIL);
        assert!(!user.email_resolved);
        assert_eq!(user.display_name, "unknown");

        let json = serde_json::to_value(&tenant).unwrap();
        assert_eq!(json["roles"], json!([]));
    }

    #[test]
    fn test_tenant_fallback_order() {
        let claims = validated(json!({
            "sub": "u1",
            "tid": "",
            "tenantId": "from-tenantId",
            "http://schemas.microsoft.com/identity/claims/tenantid": "from-uri"
        }));
        let (_, tenant) = ClaimsProjector::new().project(&claims);
        assert_eq!(tenant.tenant_id, "from-tenantId");

        let claims = validated(json!({
            "sub": "u1",
            "http://schemas.microsoft.com/identity/claims/tenantid": "from-uri"
        }));
        let (_, tenant) = ClaimsProjector::new().project(&claims);
        assert_eq!(tenant.tenant_id, "from-uri");
    }

    #[test]
    fn test_email_falls_back_to_preferred_username() {
        let claims = validated(json!({"sub": "u1", "preferred_username": "bob@corp.example"}));
        let (user, _) = ClaimsProjector::new().project(&claims);
        assert_eq!(user.email, "bob@corp.example");
        assert!(user.email_resolved);
        assert_eq!(user.display_name, "bob");
    }

    #[test]
    fn test_non_string_email_and_name_are_skipped() {
        let claims = validated(json!({
            "sub": "u1",
            "email": 5,
            "preferred_username": "dave@corp.example",
            "name": ["Dave", "Smith"]
        }));
        let (user, _) = ClaimsProjector::new().project(&claims);

        assert_eq!(user.email, "dave@corp.example");
        assert_eq!(user.display_name, "dave");
        assert_eq!(user.claims["email"], "5");

        let claims = validated(json!({"sub": "u1", "email": 5}));
        let (user, _) = ClaimsProjector::new().project(&claims);
        assert_eq!(user.email, UNKNOWN_EMAIL);
        assert!(!user.email_resolved);
        assert_eq!(claims.email, None);
    }

    #[test]
    fn test_custom_claim_chains() {
        let projector = ClaimsProjector::new()
            .with_tenant_claims(["org"])
            .with_email_claims(["upn"])
            .with_name_claims(["given_name"]);
        let claims = validated(json!({
            "sub": "u1",
            "tid": "ignored",
            "org": "acme",
            "upn": "carol@acme.example",
            "given_name": "Carol"
        }));

        let (user, tenant) = projector.project(&claims);
        assert_eq!(tenant.tenant_id, "acme");
        assert_eq!(user.email, "carol@acme.example");
        assert_eq!(user.display_name, "Carol");
        assert_eq!(projector.tenant_claims(), ["org"]);
    }

    #[test]
    fn test_projection_is_idempotent() {
        let claims = validated(json!({
            "sub": "u1",
            "email": "ann@example.com",
            "tenantId": "t1",
            "role": "User,Admin"
        }));
        let projector = ClaimsProjector::new();
        assert_eq!(projector.project(&claims), projector.project(&claims));
    }

    #[test]
    fn test_local_part() {
        assert_eq!(local_part("ann@example.com"), "ann");
        assert_eq!(local_part("no-at-sign"), "no-at-sign");
    }
}
