//! Server-side browser sessions keyed by an opaque cookie value.

use crate::error::StoreError;
use crate::oauth2::password::generate_token;
use crate::oauth2::store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "session:";

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "authgate_session";

/// Identity placed in the session after a successful login.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub email: Option<String>,
    pub account: String,
    pub mobile: Option<String>,
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    fn key(id: &str) -> String {
        format!("{KEY_PREFIX}{id}")
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session for `user` and return its id.
    #[tracing::instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn start(&self, user: &SessionUser) -> Result<String, StoreError> {
        let id = generate_token();
        let value = serde_json::to_vec(user)?;
        self.store.set(&Self::key(&id), value, self.ttl).await?;
        Ok(id)
    }

    #[tracing::instrument(skip_all)]
    pub async fn current(&self, id: &str) -> Result<Option<SessionUser>, StoreError> {
        match self.store.get(&Self::key(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn end(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(&Self::key(id)).await
    }
}
