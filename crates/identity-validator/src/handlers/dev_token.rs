//! Development token endpoint.
//!
//! Only routed when `DEV_TOKEN_ISSUER` is configured.

use crate::auth::TokenRequest;
use crate::errors::ApiError;
use crate::routes::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevTokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub message: &'static str,
}

/// Handler for POST /v1/dev/token
///
/// An empty JSON object yields a token for the default test user.
///
/// # Errors
///
/// - `ApiError::NotFound` if token minting is disabled
/// - `ApiError::BadRequest` if `userId` is empty
#[instrument(skip_all, name = "idv.handlers.dev_token")]
pub async fn issue_dev_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<DevTokenResponse>, ApiError> {
    let issuer = state
        .token_issuer
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("Token issuance is disabled".to_string()))?;

    let issued = issuer.issue(&request, Utc::now())?;

    Ok(Json(DevTokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
        message: "Token generated. Send it as 'Authorization: Bearer <token>'.",
    }))
}
