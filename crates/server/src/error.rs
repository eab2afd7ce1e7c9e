use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hash(String),
    #[error("Stored password hash is malformed: {0}")]
    MalformedHash(String),
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Signing key must not be empty")]
    EmptyKey,
    #[error("Token signing failed: {0}")]
    Signing(String),
    #[error("Token is invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures surfaced by the authorization flow.
///
/// Everything except [`AuthError::Storage`] and [`AuthError::Internal`] is a
/// terminal protocol or authentication failure.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication failed")]
    AuthFailed,
    #[error("A logged-in session is required")]
    SessionRequired,
    #[error("Client is unknown, disabled or misconfigured: {0}")]
    ClientInvalid(String),
    #[error("Client identity does not match the authorization code")]
    ClientMismatch,
    #[error("Authorization code not found")]
    CodeNotFound,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Storage(_) | AuthError::Internal(_))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidRequest(_)
            | AuthError::UnsupportedGrantType(_)
            | AuthError::ClientInvalid(_) => StatusCode::BAD_REQUEST,
            AuthError::AuthFailed | AuthError::SessionRequired | AuthError::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::ClientMismatch => StatusCode::FORBIDDEN,
            AuthError::CodeNotFound => StatusCode::NOT_FOUND,
            AuthError::Storage(_) | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// OAuth2 style error code used in JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::AuthFailed => "access_denied",
            AuthError::SessionRequired => "login_required",
            AuthError::ClientInvalid(_) => "invalid_client",
            AuthError::ClientMismatch => "unauthorized_client",
            AuthError::CodeNotFound => "invalid_grant",
            AuthError::InvalidToken => "invalid_token",
            AuthError::InvalidRequest(_) => "invalid_request",
            AuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            AuthError::Storage(_) | AuthError::Internal(_) => "server_error",
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid(_) => AuthError::InvalidToken,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs.
        let error_description = if self.is_retryable() {
            tracing::error!(error = %self, "authorization request failed");
            None
        } else {
            Some(self.to_string())
        };
        (
            status,
            Json(ErrorResponse {
                error: self.code().to_string(),
                error_description,
            }),
        )
            .into_response()
    }
}
