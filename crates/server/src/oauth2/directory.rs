//! Account and client lookups, plus the provisioning calls that create them.

use crate::entity::{STATUS_VALID, account, client};
use crate::error::{AuthError, StoreError};
use crate::oauth2::password::{hash_password, random_string};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use time::OffsetDateTime;

pub const ACCESS_KEY_LEN: usize = 32;
pub const ACCESS_SECRET_LEN: usize = 40;

/// Read access the authorization flow needs.
///
/// Soft-deleted rows are invisible. Disabled rows are returned so the caller
/// can decide how to report them.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Resolve a username, email or mobile number within a realm, in that order of precedence.
    async fn account_by_identifier(
        &self,
        realm_id: &str,
        identifier: &str,
    ) -> Result<Option<account::Model>, StoreError>;

    /// Resolve a client by the public `client_id` (its access key).
    async fn client_by_id(&self, client_id: &str) -> Result<Option<client::Model>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub realm_id: String,
    pub username: String,
    pub email: Option<String>,
    pub mobile: Option<String>,
    pub display_name: String,
    pub avatar: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct NewClient {
    pub realm_id: String,
    pub name: String,
    pub redirect_url: String,
}

#[derive(Clone)]
pub struct DbDirectory {
    db: Arc<DatabaseConnection>,
}

impl DbDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn hash_blocking(password: String) -> Result<(String, String), AuthError> {
        tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {e}")))?
            .map_err(AuthError::from)
    }

    #[tracing::instrument(skip(self, new), fields(realm_id = %new.realm_id, username = %new.username))]
    pub async fn create_account(&self, new: NewAccount) -> Result<account::Model, AuthError> {
        if new.username.trim().is_empty() {
            return Err(AuthError::InvalidRequest("username must not be empty".into()));
        }
        if new.password.is_empty() {
            return Err(AuthError::InvalidRequest("password must not be empty".into()));
        }
        let (hash, salt) = Self::hash_blocking(new.password).await?;
        let now = OffsetDateTime::now_utc();
        let active = account::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            realm_id: Set(new.realm_id),
            username: Set(new.username),
            email: Set(new.email),
            mobile: Set(new.mobile),
            display_name: Set(new.display_name),
            avatar: Set(new.avatar),
            password: Set(hash),
            salt: Set(salt),
            status: Set(STATUS_VALID),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        };
        let model = active
            .insert(self.db.as_ref())
            .await
            .map_err(StoreError::from)?;
        tracing::info!(account_id = %model.id, "account created");
        Ok(model)
    }

    /// Replace the password and salt together.
    #[tracing::instrument(skip(self, password))]
    pub async fn set_password(&self, account_id: &str, password: &str) -> Result<(), AuthError> {
        if password.is_empty() {
            return Err(AuthError::InvalidRequest("password must not be empty".into()));
        }
        let account = account::Entity::find_by_id(account_id.to_string())
            .filter(account::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| AuthError::InvalidRequest("unknown account".into()))?;

        let (hash, salt) = Self::hash_blocking(password.to_string()).await?;
        let mut active: account::ActiveModel = account.into();
        active.password = Set(hash);
        active.salt = Set(salt);
        active.updated_at = Set(OffsetDateTime::now_utc());
        active
            .update(self.db.as_ref())
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, new), fields(realm_id = %new.realm_id, name = %new.name))]
    pub async fn create_client(&self, new: NewClient) -> Result<client::Model, AuthError> {
        url::Url::parse(&new.redirect_url)
            .map_err(|e| AuthError::InvalidRequest(format!("invalid redirect_url: {e}")))?;
        let now = OffsetDateTime::now_utc();
        let active = client::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            realm_id: Set(new.realm_id),
            name: Set(new.name),
            access_key: Set(random_string(ACCESS_KEY_LEN)),
            access_secret: Set(random_string(ACCESS_SECRET_LEN)),
            redirect_url: Set(new.redirect_url),
            status: Set(STATUS_VALID),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        };
        let model = active
            .insert(self.db.as_ref())
            .await
            .map_err(StoreError::from)?;
        tracing::info!(client_id = %model.access_key, "client registered");
        Ok(model)
    }

    /// Issue a new secret. Codes and tokens issued earlier stay bound to the old one.
    #[tracing::instrument(skip(self))]
    pub async fn rotate_client_secret(&self, client_id: &str) -> Result<client::Model, AuthError> {
        let client = self
            .client_by_id(client_id)
            .await?
            .ok_or_else(|| AuthError::ClientInvalid("unknown client".into()))?;
        let mut active: client::ActiveModel = client.into();
        active.access_secret = Set(random_string(ACCESS_SECRET_LEN));
        active.updated_at = Set(OffsetDateTime::now_utc());
        let model = active
            .update(self.db.as_ref())
            .await
            .map_err(StoreError::from)?;
        tracing::info!(client_id = %model.access_key, "client secret rotated");
        Ok(model)
    }
}

#[async_trait]
impl Directory for DbDirectory {
    async fn account_by_identifier(
        &self,
        realm_id: &str,
        identifier: &str,
    ) -> Result<Option<account::Model>, StoreError> {
        for column in [
            account::Column::Username,
            account::Column::Email,
            account::Column::Mobile,
        ] {
            let found = account::Entity::find()
                .filter(account::Column::RealmId.eq(realm_id))
                .filter(column.eq(identifier))
                .filter(account::Column::DeletedAt.is_null())
                .one(self.db.as_ref())
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    async fn client_by_id(&self, client_id: &str) -> Result<Option<client::Model>, StoreError> {
        Ok(client::Entity::find()
            .filter(client::Column::AccessKey.eq(client_id))
            .filter(client::Column::DeletedAt.is_null())
            .one(self.db.as_ref())
            .await?)
    }
}
