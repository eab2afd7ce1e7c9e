//! One-time authorization codes.

use crate::error::StoreError;
use crate::oauth2::store::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

const KEY_PREFIX: &str = "code:";

/// Everything a client receives when it redeems a code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCode {
    pub code: String,
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub access_token_expires_at: OffsetDateTime,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_token_expires_at: OffsetDateTime,
}

/// Authorization codes on top of a [`KvStore`], serialized as JSON.
#[derive(Clone)]
pub struct CodeStore {
    store: Arc<dyn KvStore>,
}

impl CodeStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn key(code: &str) -> String {
        format!("{KEY_PREFIX}{code}")
    }

    #[tracing::instrument(skip(self, session_code), fields(client_id = %session_code.client_id))]
    pub async fn put(&self, session_code: &SessionCode, ttl: Duration) -> Result<(), StoreError> {
        let value = serde_json::to_vec(session_code)?;
        self.store
            .set(&Self::key(&session_code.code), value, ttl)
            .await
    }

    /// Fetch and delete in one step. `None` once the code was used or has expired.
    #[tracing::instrument(skip_all)]
    pub async fn take_once(&self, code: &str) -> Result<Option<SessionCode>, StoreError> {
        match self.store.take(&Self::key(code)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
