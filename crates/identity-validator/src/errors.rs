//! HTTP error type.
//!
//! Client-facing messages are generic. Details stay in server-side logs.

use crate::auth::{AuthenticationFailed, IssueError};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

const WWW_AUTHENTICATE_INVALID_TOKEN: &str =
    "Bearer realm=\"identity-validator\", error=\"invalid_token\"";

/// API error type.
///
/// - Unauthorized: 401 with `WWW-Authenticate`
/// - Forbidden: 403
/// - NotFound: 404
/// - BadRequest: 400
/// - Internal: 500
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (code, message) = match self {
            ApiError::Unauthorized(message) => ("INVALID_TOKEN", message),
            ApiError::Forbidden(message) => ("FORBIDDEN", message),
            ApiError::NotFound(message) => ("NOT_FOUND", message),
            ApiError::BadRequest(message) => ("BAD_REQUEST", message),
            ApiError::Internal => ("INTERNAL_ERROR", "An internal error occurred".to_string()),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(WWW_AUTHENTICATE_INVALID_TOKEN),
            );
        }

        response
    }
}

impl From<AuthenticationFailed> for ApiError {
    fn from(err: AuthenticationFailed) -> Self {
        // Display is generic; per-issuer reasons were logged by the dispatcher
        ApiError::Unauthorized(err.to_string())
    }
}

impl From<IssueError> for ApiError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::EmptyField(_) => ApiError::BadRequest(err.to_string()),
            IssueError::NotSymmetric(_) | IssueError::NoAudience(_) | IssueError::Signing => {
                tracing::error!(target: "idv.errors", error = %err, "Development token issuance failed");
                ApiError::Internal
            }
        }
    }
}
