//! Browser login endpoints.
//!
//! - `GET /login` - login form, or a welcome page for an existing session
//! - `POST /login` - verify credentials and start a session
//! - `GET /logout` - end the session

use crate::error::AuthError;
use crate::oauth2::session::{SESSION_COOKIE, SessionUser};
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use askama::Template;
use axum::{
    Form,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Login page template.
#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    account: String,
    r: String,
    error: Option<String>,
}

/// Shown on `GET /login` when a session already exists.
#[derive(Template)]
#[template(path = "welcome.html")]
struct WelcomeTemplate {
    user: SessionUser,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LoginQuery {
    /// Base64-encoded local path to return to after login
    pub r: Option<String>,
}

/// Form data for login submission.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginForm {
    /// Username, email or mobile number
    pub account: String,
    pub password: String,
    /// Defaults to the configured realm
    pub realm: Option<String>,
    /// Base64-encoded local path to return to after login
    pub r: Option<String>,
}

/// Creates the login router.
pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(login_page, login_submit))
        .routes(routes!(logout))
        .with_state(state)
}

fn render(template: &impl Template, status: StatusCode) -> Response {
    match template.render() {
        Ok(html) => (status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!("Failed to render template: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Decode the `r` parameter, accepting only paths on this host.
pub fn return_target(r: Option<&str>) -> Option<String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(r?.trim())
        .ok()?;
    let target = String::from_utf8(decoded).ok()?;
    let local = target.starts_with('/') && !target.starts_with("//") && !target.contains('\\');
    local.then_some(target)
}

fn session_cookie(id: String, state: &OAuth2State) -> Cookie<'static> {
    let max_age = i64::try_from(state.manager.settings().session_expiry).unwrap_or(i64::MAX);
    Cookie::build((SESSION_COOKIE, id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(state.secure_cookies)
        .max_age(time::Duration::seconds(max_age))
        .build()
}

/// Display the login page.
#[tracing::instrument(skip(state, jar))]
#[utoipa::path(
    get,
    path = "/login",
    tag = OAUTH2_TAG,
    operation_id = "Login Page",
    summary = "Display the login form",
    description = "Renders the login form. If the browser already holds a valid session, a welcome page is shown instead.",
    params(LoginQuery),
    responses(
        (status = 200, description = "Login or welcome page HTML", content_type = "text/html"),
        (status = 500, description = "Internal server error"),
    )
)]
async fn login_page(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Query(params): Query<LoginQuery>,
) -> Result<Response, AuthError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE)
        && let Some(user) = state.manager.current_user(cookie.value()).await?
    {
        return Ok(render(&WelcomeTemplate { user }, StatusCode::OK));
    }

    let template = LoginTemplate {
        account: String::new(),
        r: params.r.unwrap_or_default(),
        error: None,
    };
    Ok(render(&template, StatusCode::OK))
}

/// Handle login form submission.
#[tracing::instrument(skip(state, jar, form), fields(account = %form.account))]
#[utoipa::path(
    post,
    path = "/login",
    tag = OAUTH2_TAG,
    operation_id = "Login Submit",
    summary = "Submit login credentials",
    description = "Verifies the account and password, starts a session and sets the session cookie. \
                   Redirects to the decoded `r` path when it points at this host, otherwise back to `/login`.",
    request_body(
        content = LoginForm,
        content_type = "application/x-www-form-urlencoded",
        description = "Login credentials"
    ),
    responses(
        (status = 303, description = "Logged in, redirect to the return path"),
        (status = 401, description = "Invalid credentials, form shown again", content_type = "text/html"),
        (status = 500, description = "Internal server error"),
    )
)]
async fn login_submit(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<Response, AuthError> {
    let account = form.account.trim();
    let result = state
        .manager
        .login(form.realm.as_deref(), account, &form.password)
        .await;

    match result {
        Ok((session_id, _user)) => {
            let target = return_target(form.r.as_deref()).unwrap_or_else(|| "/login".to_string());
            let jar = jar.add(session_cookie(session_id, &state));
            Ok((jar, Redirect::to(&target)).into_response())
        }
        Err(AuthError::AuthFailed) => {
            let template = LoginTemplate {
                account: account.to_string(),
                r: form.r.unwrap_or_default(),
                error: Some("Invalid account or password".to_string()),
            };
            Ok(render(&template, StatusCode::UNAUTHORIZED))
        }
        Err(e) => Err(e),
    }
}

/// End the current session.
#[tracing::instrument(skip(state, jar))]
#[utoipa::path(
    get,
    path = "/logout",
    tag = OAUTH2_TAG,
    operation_id = "Logout",
    summary = "End the browser session",
    responses(
        (status = 303, description = "Session cleared, redirect to /login"),
    )
)]
async fn logout(State(state): State<OAuth2State>, jar: CookieJar) -> Result<Response, AuthError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.manager.logout(cookie.value()).await?;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, Redirect::to("/login")).into_response())
}
