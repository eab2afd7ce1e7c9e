//! TTL key/value storage shared by browser sessions and authorization codes.

use crate::entity::kv_entry;
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    sea_query::OnConflict,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Byte-valued store with per-entry expiry.
///
/// `take` must be atomic: of any number of concurrent callers for the same key,
/// at most one receives the value.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process store for single-node deployments and tests.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    last_cleanup: Arc<Mutex<Instant>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            last_cleanup: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Perform lazy cleanup if enough time has passed
    fn maybe_cleanup(&self) {
        if let Ok(mut last_cleanup) = self.last_cleanup.try_lock()
            && last_cleanup.elapsed() >= CLEANUP_INTERVAL
        {
            *last_cleanup = Instant::now();
            drop(last_cleanup);
            self.entries.retain(|_, entry| !entry.is_expired());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.maybe_cleanup();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.maybe_cleanup();
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        // DashMap::remove holds the shard lock, so only one caller gets the entry.
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value))
    }
}

/// Store persisted in the `kv_store` table, usable across several gateway instances.
#[derive(Clone)]
pub struct DatabaseStore {
    db: Arc<DatabaseConnection>,
    last_cleanup: Arc<Mutex<Instant>>,
}

impl DatabaseStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            last_cleanup: Arc::new(Mutex::new(Instant::now())),
        }
    }

    fn now() -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }

    fn expiry_for(ttl: Duration) -> i64 {
        let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        Self::now().saturating_add(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    fn cleanup_due(&self) -> bool {
        match self.last_cleanup.try_lock() {
            Ok(mut last_cleanup) if last_cleanup.elapsed() >= CLEANUP_INTERVAL => {
                *last_cleanup = Instant::now();
                true
            }
            _ => false,
        }
    }

    /// Delete expired rows. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let res = kv_entry::Entity::delete_many()
            .filter(kv_entry::Column::ExpiresAt.lte(Self::now()))
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected)
    }

    async fn maybe_cleanup(&self) {
        if self.cleanup_due() {
            match self.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "purged expired kv entries"),
                Err(e) => tracing::warn!(error = %e, "failed to purge expired kv entries"),
            }
        }
    }
}

#[async_trait]
impl KvStore for DatabaseStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entry = kv_entry::Entity::find_by_id(key.to_string())
            .one(self.db.as_ref())
            .await?;
        let now = Self::now();
        Ok(entry
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.maybe_cleanup().await;
        let active = kv_entry::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            expires_at: Set(Self::expiry_for(ttl)),
        };
        kv_entry::Entity::insert(active)
            .on_conflict(
                OnConflict::column(kv_entry::Column::Key)
                    .update_columns([kv_entry::Column::Value, kv_entry::Column::ExpiresAt])
                    .to_owned(),
            )
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        kv_entry::Entity::delete_by_id(key.to_string())
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let Some(entry) = kv_entry::Entity::find_by_id(key.to_string())
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(None);
        };
        // Whoever deletes the row owns the value; a concurrent taker sees zero rows affected.
        let res = kv_entry::Entity::delete_by_id(key.to_string())
            .exec(self.db.as_ref())
            .await?;
        if res.rows_affected != 1 || entry.is_expired_at(Self::now()) {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }
}
