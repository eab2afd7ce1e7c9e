//! Authorization flow orchestration.
//!
//! Login establishes a browser session, `authorize` turns a session into a
//! one-time code bound to a freshly signed token pair, `exchange` redeems the
//! code exactly once and `refresh` mints new access tokens from a refresh token.

use crate::config::AuthConfig;
use crate::error::{AuthError, StoreError};
use crate::oauth2::code::{CodeStore, SessionCode};
use crate::oauth2::directory::Directory;
use crate::oauth2::jwt::{Sign, TokenSigner, TokenType};
use crate::oauth2::password::{random_string, verify_password};
use crate::oauth2::session::{SessionStore, SessionUser};
use crate::oauth2::store::KvStore;
use std::future::Future;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use url::Url;

/// Length of an authorization code.
pub const CODE_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct AuthorizeRequest<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub state: &'a str,
}

/// Tokens handed out on code exchange.
#[derive(Debug, Clone)]
pub struct TokenBundle {
    pub client_id: String,
    pub access_token: String,
    pub access_token_expires_at: OffsetDateTime,
    pub refresh_token: String,
    pub refresh_token_expires_at: OffsetDateTime,
}

/// A single access token minted from a refresh token.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub access_token: String,
    pub access_token_expires_at: OffsetDateTime,
}

pub struct AuthorizationManager {
    settings: AuthConfig,
    signer: TokenSigner,
    directory: Arc<dyn Directory>,
    codes: CodeStore,
    sessions: SessionStore,
}

fn secure_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

impl AuthorizationManager {
    /// Build a manager whose codes and sessions share `store`.
    pub fn new(settings: AuthConfig, directory: Arc<dyn Directory>, store: Arc<dyn KvStore>) -> Self {
        let signer = TokenSigner::new(settings.issuer.clone());
        let sessions = SessionStore::new(store.clone(), settings.session_ttl());
        Self {
            signer,
            directory,
            codes: CodeStore::new(store),
            sessions,
            settings,
        }
    }

    pub fn settings(&self) -> &AuthConfig {
        &self.settings
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Run one store or directory call under the configured I/O timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let limit = self.settings.io_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| StoreError::Timeout(limit))?
    }

    /// Check credentials without touching the session store.
    #[tracing::instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        realm_id: Option<&str>,
        identifier: &str,
        password: &str,
    ) -> Result<SessionUser, AuthError> {
        let realm_id = realm_id
            .filter(|r| !r.is_empty())
            .unwrap_or(self.settings.default_realm.as_str());
        let account = self
            .bounded(self.directory.account_by_identifier(realm_id, identifier))
            .await?;
        let Some(account) = account else {
            tracing::warn!(realm_id, "login for unknown account");
            return Err(AuthError::AuthFailed);
        };
        if !account.is_active() {
            tracing::warn!(account_id = %account.id, "login for disabled account");
            return Err(AuthError::AuthFailed);
        }

        let hash = account.password.clone();
        let salt = account.salt.clone();
        let candidate = password.to_string();
        let matched =
            tokio::task::spawn_blocking(move || verify_password(&hash, &salt, &candidate))
                .await
                .map_err(|e| AuthError::Internal(format!("verification task failed: {e}")))?
                .inspect_err(|e| {
                    tracing::error!(account_id = %account.id, error = %e, "stored password hash unusable")
                })?;
        if !matched {
            tracing::warn!(account_id = %account.id, "wrong password");
            return Err(AuthError::AuthFailed);
        }

        Ok(SessionUser {
            id: account.id,
            name: account.display_name,
            avatar: account.avatar,
            email: account.email,
            account: account.username,
            mobile: account.mobile,
        })
    }

    /// Authenticate and open a session. Returns the session id and its user.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(
        &self,
        realm_id: Option<&str>,
        identifier: &str,
        password: &str,
    ) -> Result<(String, SessionUser), AuthError> {
        let user = self.authenticate(realm_id, identifier, password).await?;
        let session_id = self.bounded(self.sessions.start(&user)).await?;
        tracing::info!(user_id = %user.id, "login succeeded");
        Ok((session_id, user))
    }

    #[tracing::instrument(skip_all)]
    pub async fn current_user(&self, session_id: &str) -> Result<Option<SessionUser>, AuthError> {
        Ok(self.bounded(self.sessions.current(session_id)).await?)
    }

    #[tracing::instrument(skip_all)]
    pub async fn logout(&self, session_id: &str) -> Result<(), AuthError> {
        Ok(self.bounded(self.sessions.end(session_id)).await?)
    }

    /// Issue a one-time code for a logged-in user and return the client redirect target.
    ///
    /// `redirect_uri` must equal the registered redirect URL once both are parsed;
    /// a differing URI is rejected rather than silently replaced. The code is only
    /// returned once it has been stored.
    #[tracing::instrument(skip(self, user), fields(user_id = user.map(|u| u.id.as_str())))]
    pub async fn authorize(
        &self,
        user: Option<&SessionUser>,
        req: &AuthorizeRequest<'_>,
    ) -> Result<Url, AuthError> {
        let user = user.ok_or(AuthError::SessionRequired)?;
        if req.state.is_empty() {
            return Err(AuthError::InvalidRequest("state is required".into()));
        }

        let client = self
            .bounded(self.directory.client_by_id(req.client_id))
            .await?
            .ok_or_else(|| {
                tracing::warn!(client_id = req.client_id, "authorize for unknown client");
                AuthError::ClientInvalid("unknown client".into())
            })?;
        if !client.is_active() {
            tracing::warn!(client_id = req.client_id, "authorize for disabled client");
            return Err(AuthError::ClientInvalid("client is disabled".into()));
        }

        let requested = Url::parse(req.redirect_uri)
            .map_err(|e| AuthError::InvalidRequest(format!("invalid redirect_uri: {e}")))?;
        let mut target = Url::parse(&client.redirect_url).map_err(|e| {
            tracing::error!(client_id = req.client_id, error = %e, "registered redirect_url is not a URL");
            AuthError::ClientInvalid("client has no usable redirect_url".into())
        })?;
        if requested != target {
            tracing::warn!(client_id = req.client_id, "redirect_uri does not match registration");
            return Err(AuthError::ClientInvalid("redirect_uri mismatch".into()));
        }

        let now = OffsetDateTime::now_utc();
        let access = self.signer.sign_at(
            &Sign {
                subject: &user.id,
                name: &user.name,
                token_type: TokenType::Access,
                ttl: self.settings.access_ttl(),
                key: &client.access_secret,
            },
            now,
        )?;
        let refresh = self.signer.sign_at(
            &Sign {
                subject: &user.id,
                name: &user.name,
                token_type: TokenType::Refresh,
                ttl: self.settings.refresh_ttl(),
                key: &client.access_secret,
            },
            now,
        )?;

        let session_code = SessionCode {
            code: random_string(CODE_LEN),
            client_id: client.access_key.clone(),
            client_secret: client.access_secret.clone(),
            access_token: access.token,
            access_token_expires_at: access.expires_at,
            refresh_token: refresh.token,
            refresh_token_expires_at: refresh.expires_at,
        };
        self.bounded(self.codes.put(&session_code, self.settings.code_ttl()))
            .await?;

        target
            .query_pairs_mut()
            .append_pair("code", &session_code.code)
            .append_pair("state", req.state);
        tracing::info!(client_id = req.client_id, "authorization code issued");
        Ok(target)
    }

    /// Redeem a code. Succeeds at most once per code.
    #[tracing::instrument(skip(self, code, client_secret))]
    pub async fn exchange(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenBundle, AuthError> {
        let Some(sc) = self.bounded(self.codes.take_once(code)).await? else {
            tracing::warn!("authorization code missing, expired or already used");
            return Err(AuthError::CodeNotFound);
        };
        // Evaluate both so the comparison does not short-circuit.
        let id_ok = secure_eq(&sc.client_id, client_id);
        let secret_ok = secure_eq(&sc.client_secret, client_secret);
        if !(id_ok & secret_ok) {
            tracing::warn!("authorization code redeemed by a different client");
            return Err(AuthError::ClientMismatch);
        }

        tracing::info!("authorization code exchanged");
        Ok(TokenBundle {
            client_id: sc.client_id,
            access_token: sc.access_token,
            access_token_expires_at: sc.access_token_expires_at,
            refresh_token: sc.refresh_token,
            refresh_token_expires_at: sc.refresh_token_expires_at,
        })
    }

    /// Mint a new access token from a refresh token signed with `client_secret`.
    ///
    /// The refresh token itself stays valid until its own expiry.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client_secret: &str,
    ) -> Result<AccessGrant, AuthError> {
        let claims = self
            .signer
            .validate(refresh_token, client_secret)
            .map_err(|e| {
                tracing::warn!(error = %e, "refresh token rejected");
                AuthError::InvalidToken
            })?;
        if claims.token_type != TokenType::Refresh {
            tracing::warn!(sub = %claims.sub, "non-refresh token presented for refresh");
            return Err(AuthError::InvalidToken);
        }

        let access = self.signer.sign(&Sign {
            subject: &claims.sub,
            name: &claims.name,
            token_type: TokenType::Access,
            ttl: self.settings.access_ttl(),
            key: client_secret,
        })?;
        tracing::info!(sub = %claims.sub, "access token refreshed");
        Ok(AccessGrant {
            access_token: access.token,
            access_token_expires_at: access.expires_at,
        })
    }
}
