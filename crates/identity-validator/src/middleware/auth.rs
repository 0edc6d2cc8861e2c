//! Bearer token authentication middleware.
//!
//! Extracts the token from `Authorization: Bearer <token>`, authenticates it
//! against every configured issuer, and stores the result as an
//! [`AuthenticatedUser`] request extension.

use crate::auth::{
    ClaimsProjector, MultiIssuerDispatcher, TenantContext, UserContext, ValidatedClaims,
};
use crate::errors::ApiError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub dispatcher: Arc<MultiIssuerDispatcher>,
    pub projector: Arc<ClaimsProjector>,
}

/// The authenticated caller, available to handlers behind [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: ValidatedClaims,
    pub user: UserContext,
    pub tenant: TenantContext,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.tenant.has_role(role)
    }
}

fn extract_bearer_token(req: &Request) -> Result<&str, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "idv.middleware.auth", "Missing Authorization header");
            ApiError::Unauthorized("Missing Authorization header".to_string())
        })?;

    let (scheme, token) = auth_header.split_once(' ').ok_or_else(|| {
        tracing::debug!(target: "idv.middleware.auth", "Invalid Authorization header format");
        ApiError::Unauthorized("Invalid Authorization header format".to_string())
    })?;

    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("Bearer") || token.is_empty() {
        tracing::debug!(target: "idv.middleware.auth", "Invalid Authorization header format");
        return Err(ApiError::Unauthorized(
            "Invalid Authorization header format".to_string(),
        ));
    }

    Ok(token)
}

/// Authentication middleware.
///
/// # Response
///
/// - 401 Unauthorized if the token is missing or rejected by every issuer
/// - Otherwise continues with [`AuthenticatedUser`] in request extensions
#[instrument(skip_all, name = "idv.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let token = extract_bearer_token(&req)?;

    let claims = state.dispatcher.authenticate(token).await?;
    let (user, tenant) = state.projector.project(&claims);

    req.extensions_mut().insert(AuthenticatedUser {
        claims,
        user,
        tenant,
    });

    Ok(next.run(req).await)
}
