//! End-to-end tests for login, authorization and token endpoints.

use authgate::api::app;
use authgate::config::AuthConfig;
use authgate::error::AuthError;
use authgate::oauth2::directory::{ACCESS_KEY_LEN, ACCESS_SECRET_LEN, NewAccount, NewClient};
use authgate::oauth2::manager::AuthorizeRequest;
use authgate::oauth2::session::SESSION_COOKIE;
use authgate::oauth2::{
    AuthorizationManager, DatabaseStore, DbDirectory, Directory, MemoryStore, OAuth2State,
};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const CLIENT_ID: &str = "c1";
const CLIENT_SECRET: &str = "c1-secret-0123456789abcdefghijklmnopqrst";
const REDIRECT_URI: &str = "https://app/cb";

/// Create a test database with the gateway tables
async fn create_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.expect("connect");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE account (
            id TEXT PRIMARY KEY,
            realm_id TEXT NOT NULL,
            username TEXT NOT NULL,
            email TEXT NULL,
            mobile TEXT NULL,
            display_name TEXT NOT NULL,
            avatar TEXT NULL,
            password TEXT NOT NULL,
            salt TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT NULL,
            UNIQUE (realm_id, username),
            UNIQUE (realm_id, email),
            UNIQUE (realm_id, mobile)
        );"#,
    ))
    .await
    .expect("create account table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE client (
            id TEXT PRIMARY KEY,
            realm_id TEXT NOT NULL,
            name TEXT NOT NULL,
            access_key TEXT NOT NULL UNIQUE,
            access_secret TEXT NOT NULL,
            redirect_url TEXT NOT NULL,
            status INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT NULL
        );"#,
    ))
    .await
    .expect("create client table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"CREATE TABLE kv_store (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            expires_at INTEGER NOT NULL
        );"#,
    ))
    .await
    .expect("create kv_store table");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        format!(
            r#"INSERT INTO client (id, realm_id, name, access_key, access_secret, redirect_url, status, created_at, updated_at)
               VALUES ('client-1', 'default', 'Test App', '{CLIENT_ID}', '{CLIENT_SECRET}', '{REDIRECT_URI}', 0, datetime('now'), datetime('now'));"#
        ),
    ))
    .await
    .expect("insert test client");

    db.execute(Statement::from_string(
        DbBackend::Sqlite,
        r#"INSERT INTO client (id, realm_id, name, access_key, access_secret, redirect_url, status, created_at, updated_at)
           VALUES ('client-2', 'default', 'Disabled App', 'disabled', 'disabled-secret', 'https://disabled/cb', 255, datetime('now'), datetime('now'));"#,
    ))
    .await
    .expect("insert disabled client");

    db
}

async fn create_test_server() -> TestServer {
    let db = Arc::new(create_test_db().await);
    let directory = DbDirectory::new(db.clone());
    directory
        .create_account(NewAccount {
            realm_id: "default".into(),
            username: "alice".into(),
            email: Some("alice@example.com".into()),
            mobile: Some("+15550100".into()),
            display_name: "Alice".into(),
            avatar: None,
            password: "secret123".into(),
        })
        .await
        .expect("create alice");

    let manager = AuthorizationManager::new(
        AuthConfig::default(),
        Arc::new(directory),
        Arc::new(DatabaseStore::new(db)),
    );
    let state = OAuth2State::new(Arc::new(manager), false);
    TestServer::new(app(state)).expect("create test server")
}

fn authorize_path(state: &str) -> String {
    format!(
        "/oauth/authorize?response_type=code&client_id={CLIENT_ID}&redirect_uri={}&scope=openid&state={state}",
        urlencoding::encode(REDIRECT_URI)
    )
}

fn location(response: &TestResponse) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

/// The full `Set-Cookie` line for the session cookie, if any
fn set_session_cookie(response: &TestResponse) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{SESSION_COOKIE}=")))
        .map(String::from)
}

/// `name=value` pair to send back in a `Cookie` header
fn session_cookie(response: &TestResponse) -> HeaderValue {
    let line = set_session_cookie(response).expect("session cookie set");
    let pair = line.split(';').next().unwrap_or_default();
    HeaderValue::from_str(pair).expect("valid cookie header")
}

/// Log in as alice and return the session cookie
async fn login(server: &TestServer) -> HeaderValue {
    let response = server
        .post("/login")
        .form(&[("account", "alice"), ("password", "secret123")])
        .await;
    response.assert_status_see_other();
    session_cookie(&response)
}

/// Run authorize with a session and return the issued code
async fn issue_code(server: &TestServer) -> String {
    let cookie = login(server).await;
    let response = server.get(&authorize_path("xyz")).add_header(COOKIE, cookie).await;
    response.assert_status_see_other();
    let target = url::Url::parse(&location(&response)).expect("absolute redirect");
    target
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .expect("code in redirect")
}

// =============================================================================
// End-to-end flow
// =============================================================================

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let server = create_test_server().await;

    // Anonymous authorize is bounced to the login page
    let response = server.get(&authorize_path("xyz")).await;
    response.assert_status_see_other();
    let login_location = location(&response);
    let r = login_location
        .strip_prefix("/login?r=")
        .expect("redirect to login");
    let r = urlencoding::decode(r).unwrap().into_owned();
    let decoded = String::from_utf8(STANDARD.decode(&r).unwrap()).unwrap();
    assert_eq!(decoded, authorize_path("xyz"));

    // Login returns to the original authorize request
    let response = server
        .post("/login")
        .form(&[
            ("account", "alice"),
            ("password", "secret123"),
            ("r", r.as_str()),
        ])
        .await;
    response.assert_status_see_other();
    assert_eq!(location(&response), authorize_path("xyz"));
    let set_cookie = set_session_cookie(&response).expect("session cookie set");
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    let cookie = session_cookie(&response);

    // Authorize now issues a code
    let response = server.get(&authorize_path("xyz")).add_header(COOKIE, cookie).await;
    response.assert_status_see_other();
    let target = url::Url::parse(&location(&response)).unwrap();
    assert_eq!(target.scheme(), "https");
    assert_eq!(target.host_str(), Some("app"));
    assert_eq!(target.path(), "/cb");
    let pairs: Vec<(String, String)> = target.query_pairs().into_owned().collect();
    assert_eq!(pairs.len(), 2);
    assert_eq!(pairs[0].0, "code");
    assert_eq!(pairs[0].1.len(), 40);
    assert!(pairs[0].1.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(pairs[1], ("state".to_string(), "xyz".to_string()));
    let code = pairs[0].1.clone();

    // Exchange the code
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["client_id"], CLIENT_ID);
    assert_eq!(body["token_type"], "Bearer");
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(!body["refresh_token"].as_str().unwrap().is_empty());

    let expires_at = OffsetDateTime::parse(
        body["access_token_expires_at"].as_str().unwrap(),
        &Rfc3339,
    )
    .unwrap();
    let expected = OffsetDateTime::now_utc() + time::Duration::seconds(7200);
    assert!((expires_at - expected).whole_seconds().abs() < 60);
    let expires_in = body["expires_in"].as_i64().unwrap();
    assert!((7100..=7200).contains(&expires_in));

    // The same code cannot be replayed
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

// =============================================================================
// Login / logout
// =============================================================================

#[tokio::test]
async fn test_login_page_renders_form() {
    let server = create_test_server().await;
    let response = server.get("/login").await;
    response.assert_status_ok();
    assert!(response.text().contains("name=\"password\""));
}

#[tokio::test]
async fn test_login_with_email_and_mobile() {
    let server = create_test_server().await;
    for identifier in ["alice@example.com", "+15550100"] {
        let response = server
            .post("/login")
            .form(&[("account", identifier), ("password", "secret123")])
            .await;
        response.assert_status_see_other();
        assert_eq!(location(&response), "/login");
    }
}

#[tokio::test]
async fn test_login_wrong_password_rerenders_form() {
    let server = create_test_server().await;
    let response = server
        .post("/login")
        .form(&[("account", "alice"), ("password", "wrong")])
        .await;
    response.assert_status_unauthorized();
    assert!(response.text().contains("Invalid account or password"));
    assert!(set_session_cookie(&response).is_none());
}

#[tokio::test]
async fn test_login_unknown_account_and_realm() {
    let server = create_test_server().await;
    let response = server
        .post("/login")
        .form(&[("account", "mallory"), ("password", "secret123")])
        .await;
    response.assert_status_unauthorized();

    let response = server
        .post("/login")
        .form(&[
            ("account", "alice"),
            ("password", "secret123"),
            ("realm", "other"),
        ])
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_login_ignores_foreign_return_target() {
    let server = create_test_server().await;
    let r = STANDARD.encode("https://evil.example/steal");
    let response = server
        .post("/login")
        .form(&[
            ("account", "alice"),
            ("password", "secret123"),
            ("r", r.as_str()),
        ])
        .await;
    response.assert_status_see_other();
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_login_page_welcomes_existing_session() {
    let server = create_test_server().await;
    let cookie = login(&server).await;
    let response = server.get("/login").add_header(COOKIE, cookie).await;
    response.assert_status_ok();
    assert!(response.text().contains("Welcome, Alice"));
}

#[tokio::test]
async fn test_logout_ends_session() {
    let server = create_test_server().await;
    let cookie = login(&server).await;

    let response = server.get("/logout").add_header(COOKIE, cookie.clone()).await;
    response.assert_status_see_other();
    assert_eq!(location(&response), "/login");

    // The old cookie no longer grants access
    let response = server.get(&authorize_path("xyz")).add_header(COOKIE, cookie).await;
    response.assert_status_see_other();
    assert!(location(&response).starts_with("/login?r="));
}

// =============================================================================
// Authorize failures
// =============================================================================

#[tokio::test]
async fn test_authorize_unknown_client() {
    let server = create_test_server().await;
    let cookie = login(&server).await;
    let response = server
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "nonexistent-client")
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("state", "xyz")
        .add_header(COOKIE, cookie)
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_authorize_disabled_client() {
    let server = create_test_server().await;
    let cookie = login(&server).await;
    let response = server
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "disabled")
        .add_query_param("redirect_uri", "https://disabled/cb")
        .add_query_param("state", "xyz")
        .add_header(COOKIE, cookie)
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_authorize_redirect_uri_mismatch() {
    let server = create_test_server().await;
    let cookie = login(&server).await;
    let response = server
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", "https://evil.example/cb")
        .add_query_param("state", "xyz")
        .add_header(COOKIE, cookie)
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_authorize_invalid_response_type() {
    let server = create_test_server().await;
    let cookie = login(&server).await;
    let response = server
        .get("/oauth/authorize")
        .add_query_param("response_type", "token")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("state", "xyz")
        .add_header(COOKIE, cookie)
        .await;

    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_requires_state() {
    let server = create_test_server().await;
    let cookie = login(&server).await;
    let response = server
        .get("/oauth/authorize")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_header(COOKIE, cookie)
        .await;

    response.assert_status_bad_request();
}

// =============================================================================
// Token endpoint
// =============================================================================

#[tokio::test]
async fn test_token_client_mismatch() {
    let server = create_test_server().await;
    let code = issue_code(&server).await;

    let response = server
        .post("/oauth/token")
        .form(&[
            ("code", code.as_str()),
            ("client_id", CLIENT_ID),
            ("client_secret", "not-the-secret"),
        ])
        .await;
    response.assert_status_forbidden();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unauthorized_client");

    // The failed attempt consumed the code
    let response = server
        .post("/oauth/token")
        .form(&[
            ("code", code.as_str()),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn test_token_with_basic_auth() {
    let server = create_test_server().await;
    let code = issue_code(&server).await;
    let basic = STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}"));

    let response = server
        .post("/oauth/token")
        .add_header(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {basic}")).unwrap(),
        )
        .form(&[("grant_type", "authorization_code"), ("code", code.as_str())])
        .await;
    response.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_token_unknown_code() {
    let server = create_test_server().await;
    let response = server
        .post("/oauth/token")
        .form(&[
            ("code", "does-not-exist"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn test_token_missing_client_secret() {
    let server = create_test_server().await;
    let response = server
        .post("/oauth/token")
        .form(&[("code", "abc"), ("client_id", CLIENT_ID)])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_token_unsupported_grant_type() {
    let server = create_test_server().await;
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "password"),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_refresh_token_grant() {
    let server = create_test_server().await;
    let code = issue_code(&server).await;
    let tokens: serde_json::Value = server
        .post("/oauth/token")
        .form(&[
            ("code", code.as_str()),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await
        .json();
    let refresh_token = tokens["refresh_token"].as_str().unwrap();
    let access_token = tokens["access_token"].as_str().unwrap();

    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status(StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(body.get("refresh_token").is_none());
    assert!(body.get("refresh_token_expires_at").is_none());

    // An access token is not accepted as a refresh token
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", access_token),
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status_unauthorized();
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid_token");

    // Nor is a refresh token under another client's secret
    let response = server
        .post("/oauth/token")
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", "disabled"),
            ("client_secret", "disabled-secret"),
        ])
        .await;
    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_health_and_api_docs() {
    let server = create_test_server().await;
    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");

    server.get("/api-docs").await.assert_status_ok();
}

// =============================================================================
// Directory provisioning
// =============================================================================

#[tokio::test]
async fn test_provisioned_client_and_password_change() {
    let db = Arc::new(create_test_db().await);
    let directory = DbDirectory::new(db.clone());

    let bob = directory
        .create_account(NewAccount {
            realm_id: "default".into(),
            username: "bob".into(),
            email: None,
            mobile: None,
            display_name: "Bob".into(),
            avatar: Some("https://cdn/bob.png".into()),
            password: "first-pass".into(),
        })
        .await
        .expect("create bob");
    assert_ne!(bob.password, "first-pass");
    assert_eq!(bob.salt.len(), 32);

    let app_client = directory
        .create_client(NewClient {
            realm_id: "default".into(),
            name: "New App".into(),
            redirect_url: "https://new/cb".into(),
        })
        .await
        .expect("create client");
    assert_eq!(app_client.access_key.len(), ACCESS_KEY_LEN);
    assert_eq!(app_client.access_secret.len(), ACCESS_SECRET_LEN);

    let invalid = directory
        .create_client(NewClient {
            realm_id: "default".into(),
            name: "Broken".into(),
            redirect_url: "not a url".into(),
        })
        .await;
    assert!(matches!(invalid, Err(AuthError::InvalidRequest(_))));

    let manager = AuthorizationManager::new(
        AuthConfig::default(),
        Arc::new(directory.clone()),
        Arc::new(MemoryStore::new()),
    );

    let user = manager
        .authenticate(None, "bob", "first-pass")
        .await
        .expect("bob logs in");
    assert_eq!(user.avatar.as_deref(), Some("https://cdn/bob.png"));

    let target = manager
        .authorize(
            Some(&user),
            &AuthorizeRequest {
                client_id: &app_client.access_key,
                redirect_uri: "https://new/cb",
                state: "s1",
            },
        )
        .await
        .expect("authorize new client");
    let code = target
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .expect("code");
    let bundle = manager
        .exchange(&code, &app_client.access_key, &app_client.access_secret)
        .await
        .expect("exchange");
    assert_eq!(bundle.client_id, app_client.access_key);

    // Password and salt change together
    directory
        .set_password(&bob.id, "second-pass")
        .await
        .expect("set password");
    assert!(matches!(
        manager.authenticate(None, "bob", "first-pass").await,
        Err(AuthError::AuthFailed)
    ));
    assert!(manager.authenticate(None, "bob", "second-pass").await.is_ok());

    let rotated = directory
        .rotate_client_secret(&app_client.access_key)
        .await
        .expect("rotate secret");
    assert_ne!(rotated.access_secret, app_client.access_secret);
    let stored = directory
        .client_by_id(&app_client.access_key)
        .await
        .expect("lookup")
        .expect("client exists");
    assert_eq!(stored.access_secret, rotated.access_secret);
}
