//! Role-gated admin handler.

use crate::errors::ApiError;
use crate::middleware::AuthenticatedUser;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::instrument;

/// Role required by `/v1/admin`.
pub const ADMIN_ROLE: &str = "Admin";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminResponse {
    pub message: &'static str,
    pub user_id: String,
    pub roles: Vec<String>,
}

/// Handler for GET /v1/admin
///
/// # Errors
///
/// Returns `ApiError::Forbidden` unless the caller has the `Admin` role.
#[instrument(skip_all, name = "idv.handlers.admin")]
pub async fn get_admin(
    Extension(auth): Extension<AuthenticatedUser>,
) -> Result<Json<AdminResponse>, ApiError> {
    if !auth.has_role(ADMIN_ROLE) {
        tracing::debug!(target: "idv.handlers.admin", issuer = %auth.claims.issuer_name, "Caller lacks Admin role");
        return Err(ApiError::Forbidden(format!("{ADMIN_ROLE} role required")));
    }

    Ok(Json(AdminResponse {
        message: "Admin-only data",
        user_id: auth.user.user_id,
        roles: auth.user.roles,
    }))
}
