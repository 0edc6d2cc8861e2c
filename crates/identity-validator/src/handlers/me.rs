//! Current user handler.

use crate::auth::{TenantContext, UserContext};
use crate::middleware::AuthenticatedUser;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::instrument;

/// Response for `/v1/me`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
    /// Name of the issuer that accepted the token.
    pub issuer: String,
    pub tenant_context: TenantContext,
    pub all_claims: BTreeMap<String, String>,
    pub token_expires_at: DateTime<Utc>,
    pub authenticated_at: DateTime<Utc>,
}

impl MeResponse {
    fn new(user: UserContext, tenant: TenantContext, expires_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user.user_id,
            email: user.email,
            name: user.display_name,
            roles: user.roles,
            issuer: user.issuer_name,
            tenant_context: tenant,
            all_claims: user.claims,
            token_expires_at: expires_at,
            authenticated_at: Utc::now(),
        }
    }
}

/// Handler for GET /v1/me
///
/// Returns the projected user and tenant for the authenticated caller.
///
/// ```json
/// {
///   "userId": "u1",
///   "email": "u1@example.com",
///   "name": "u1",
///   "roles": ["Admin"],
///   "issuer": "LocalAuth",
///   "tenantContext": { "tenantId": "default", "roles": ["Admin"] },
///   "allClaims": { "sub": "u1", "...": "..." },
///   "tokenExpiresAt": "2026-01-01T01:00:00Z",
///   "authenticatedAt": "2026-01-01T00:00:00Z"
/// }
/// ```
#[instrument(skip_all, name = "idv.handlers.me")]
pub async fn get_me(Extension(auth): Extension<AuthenticatedUser>) -> Json<MeResponse> {
    tracing::debug!(target: "idv.handlers.me", issuer = %auth.claims.issuer_name, "Returning user details");
    Json(MeResponse::new(auth.user, auth.tenant, auth.claims.expires_at))
}
