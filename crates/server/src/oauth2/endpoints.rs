//! OAuth2 HTTP endpoints.
//!
//! - `GET /oauth/authorize` - issue a one-time code to a logged-in user
//! - `POST /oauth/token` - exchange a code, or refresh an access token

use crate::error::{AuthError, ErrorResponse};
use crate::oauth2::manager::AuthorizeRequest;
use crate::oauth2::session::SESSION_COOKIE;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{OriginalUri, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use base64::Engine;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Creates the OAuth2 router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize))
        .routes(routes!(token))
        .with_state(state)
}

/// OAuth2 authorization request parameters.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeParams {
    /// Must be "code"
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    /// Must match the redirect URL registered for the client
    pub redirect_uri: Option<String>,
    /// Accepted and ignored
    pub scope: Option<String>,
    /// Returned unchanged with the code
    pub state: Option<String>,
    /// Accepted and ignored
    pub nonce: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// `authorization_code` (default) or `refresh_token`
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub client_id: String,
    pub token_type: String,
    pub expires_in: i64,
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub access_token_expires_at: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub refresh_token_expires_at: Option<OffsetDateTime>,
}

fn required(value: Option<String>, name: &str) -> Result<String, AuthError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::InvalidRequest(format!("{name} is required")))
}

/// Login page URL that returns to `uri` after a successful login.
pub fn login_redirect_for(uri: &str) -> String {
    let r = base64::engine::general_purpose::STANDARD.encode(uri);
    format!("/login?r={}", urlencoding::encode(&r))
}

/// OAuth2 Authorization endpoint.
#[tracing::instrument(skip(state, jar, uri, params))]
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Authorize",
    summary = "Issue an authorization code",
    description = "Issues a one-time authorization code for the logged-in user and redirects to the \
                   client's registered redirect URL with `code` and `state` appended.\n\n\
                   Without a session the user is first sent to `/login`, which returns here afterwards.",
    params(
        ("response_type" = String, Query, description = "Must be `code`."),
        ("client_id" = String, Query, description = "The client's access key."),
        ("redirect_uri" = String, Query, description = "Must equal the redirect URL registered for the client."),
        ("state" = String, Query, description = "Opaque value returned unchanged to the client."),
        ("scope" = Option<String>, Query, description = "Accepted and ignored."),
        ("nonce" = Option<String>, Query, description = "Accepted and ignored."),
    ),
    responses(
        (status = 303, description = "Redirect to the login page or back to the client with a code"),
        (status = 400, description = "Invalid request or unknown client", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
    )
)]
pub async fn authorize(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<AuthorizeParams>,
) -> Result<Response, AuthError> {
    let user = match jar.get(SESSION_COOKIE) {
        Some(cookie) => state.manager.current_user(cookie.value()).await?,
        None => None,
    };
    if user.is_none() {
        let original = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/oauth/authorize");
        return Ok(Redirect::to(&login_redirect_for(original)).into_response());
    }

    let response_type = required(params.response_type, "response_type")?;
    if response_type != "code" {
        return Err(AuthError::InvalidRequest(
            "only the `code` response type is supported".into(),
        ));
    }
    let client_id = required(params.client_id, "client_id")?;
    let redirect_uri = required(params.redirect_uri, "redirect_uri")?;
    let client_state = required(params.state, "state")?;

    let target = state
        .manager
        .authorize(
            user.as_ref(),
            &AuthorizeRequest {
                client_id: &client_id,
                redirect_uri: &redirect_uri,
                state: &client_state,
            },
        )
        .await?;
    Ok(Redirect::to(target.as_str()).into_response())
}

/// OAuth2 Token endpoint.
#[tracing::instrument(skip(state, headers, params), fields(grant_type = %params.grant_type))]
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH2_TAG,
    operation_id = "OAuth2 Token",
    summary = "Exchange an authorization code or refresh an access token",
    description = "With `grant_type` `authorization_code` (or omitted), redeems a one-time code for an \
                   access and refresh token. A code can be redeemed once.\n\n\
                   With `grant_type` `refresh_token`, mints a new access token. The refresh token stays \
                   valid until its own expiry.\n\n\
                   Client credentials are read from HTTP Basic auth or from the form body.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
        description = "Token request parameters"
    ),
    responses(
        (status = 201, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Missing parameters or unsupported grant type", body = ErrorResponse),
        (status = 401, description = "Refresh token invalid or expired", body = ErrorResponse),
        (status = 403, description = "Client does not match the code", body = ErrorResponse),
        (status = 404, description = "Code unknown, expired or already used", body = ErrorResponse),
        (status = 500, description = "Storage failure", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    Form(params): Form<TokenRequest>,
) -> Result<Response, AuthError> {
    let (client_id, client_secret) = extract_client_credentials(&headers, &params);
    let client_id = required(client_id, "client_id")?;
    let client_secret = required(client_secret, "client_secret")?;
    let expires_in = |at: OffsetDateTime| (at - OffsetDateTime::now_utc()).whole_seconds().max(0);

    let body = match params.grant_type.to_ascii_lowercase().as_str() {
        "" | "authorization_code" => {
            let code = required(params.code, "code")?;
            let bundle = state
                .manager
                .exchange(&code, &client_id, &client_secret)
                .await?;
            TokenResponse {
                client_id: bundle.client_id,
                token_type: "Bearer".to_string(),
                expires_in: expires_in(bundle.access_token_expires_at),
                access_token: bundle.access_token,
                access_token_expires_at: bundle.access_token_expires_at,
                refresh_token: Some(bundle.refresh_token),
                refresh_token_expires_at: Some(bundle.refresh_token_expires_at),
            }
        }
        "refresh_token" => {
            let refresh_token = required(params.refresh_token, "refresh_token")?;
            let grant = state
                .manager
                .refresh(&refresh_token, &client_secret)
                .await?;
            TokenResponse {
                client_id,
                token_type: "Bearer".to_string(),
                expires_in: expires_in(grant.access_token_expires_at),
                access_token: grant.access_token,
                access_token_expires_at: grant.access_token_expires_at,
                refresh_token: None,
                refresh_token_expires_at: None,
            }
        }
        other => return Err(AuthError::UnsupportedGrantType(other.to_string())),
    };

    Ok((StatusCode::CREATED, Json(body)).into_response())
}

fn extract_client_credentials(
    headers: &HeaderMap,
    params: &TokenRequest,
) -> (Option<String>, Option<String>) {
    // Try Basic auth first
    if let Some(auth) = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        && let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(auth)
        && let Ok(creds) = String::from_utf8(decoded)
        && let Some((id, secret)) = creds.split_once(':')
    {
        return (Some(id.to_string()), Some(secret.to_string()));
    }

    // Fall back to form body
    (params.client_id.clone(), params.client_secret.clone())
}
