//! Client entity - registered relying-party applications.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub realm_id: String,
    pub name: String,
    /// Public identifier presented as `client_id` on the wire
    #[sea_orm(unique)]
    pub access_key: String,
    /// Shared secret, also the HS256 signing key for this client's tokens
    #[serde(skip_serializing)]
    pub access_secret: String,
    pub redirect_url: String,
    pub status: i16,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_active(&self) -> bool {
        self.status == super::STATUS_VALID && self.deleted_at.is_none()
    }
}
