use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tokio::time::timeout;

use super::MappingStore;
use crate::{
    error::{CacheError, StoreError},
    models::{ShortId, UrlMapping},
};

const KEY_PREFIX: &str = "shorturl:";

/// Cache of mappings keyed by short id.
#[async_trait]
pub trait LookupCache: Send + Sync {
    async fn get(&self, id: &ShortId) -> Result<Option<UrlMapping>, CacheError>;

    async fn set(&self, mapping: &UrlMapping) -> Result<(), CacheError>;
}

/// Mappings stored as JSON under `shorturl:<id>` with a TTL.
pub struct RedisCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        Self { conn, ttl_secs }
    }
}

fn cache_key(id: &ShortId) -> String {
    format!("{KEY_PREFIX}{id}")
}

#[async_trait]
impl LookupCache for RedisCache {
    async fn get(&self, id: &ShortId) -> Result<Option<UrlMapping>, CacheError> {
        let mut conn = self.conn.clone();
        let Some(data) = conn.get::<'_, _, Option<Vec<u8>>>(cache_key(id)).await? else {
            return Ok(None);
        };

        Ok(Some(serde_json::from_slice::<UrlMapping>(&data)?))
    }

    async fn set(&self, mapping: &UrlMapping) -> Result<(), CacheError> {
        let data = serde_json::to_vec(mapping)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<'_, _, _, ()>(cache_key(&mapping.short_id), data, self.ttl_secs)
            .await?;

        Ok(())
    }
}

/// Read-through cache for id lookups in front of another store.
///
/// Mappings never change once written, so entries only leave the cache by
/// TTL. Uniqueness checks and url lookups always go to the inner store.
/// Every cache call has its own timeout; a slow or failing cache counts as a
/// miss and never fails the store call.
pub struct CachedStore {
    inner: Arc<dyn MappingStore>,
    cache: Arc<dyn LookupCache>,
    cache_timeout: Duration,
}

impl CachedStore {
    pub fn new(
        inner: Arc<dyn MappingStore>,
        cache: Arc<dyn LookupCache>,
        cache_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            cache,
            cache_timeout,
        }
    }

    async fn cached(&self, id: &ShortId) -> Option<UrlMapping> {
        let result = timeout(self.cache_timeout, self.cache.get(id))
            .await
            .unwrap_or(Err(CacheError::TimedOut(self.cache_timeout)));

        match result {
            Ok(mapping) => mapping,
            Err(err) => {
                tracing::error!(err = ?err, %id, "cache lookup failed");
                None
            }
        }
    }

    /// Writes `mapping` to the cache in the background.
    fn warm(&self, mapping: UrlMapping) {
        let cache = Arc::clone(&self.cache);
        let cache_timeout = self.cache_timeout;
        tokio::spawn(async move {
            let result = timeout(cache_timeout, cache.set(&mapping))
                .await
                .unwrap_or(Err(CacheError::TimedOut(cache_timeout)));
            if let Err(err) = result {
                tracing::error!(err = ?err, short_id = %mapping.short_id, "cache write failed");
            }
        });
    }
}

#[async_trait]
impl MappingStore for CachedStore {
    async fn find_by_original_url(&self, url: &str) -> Result<Option<UrlMapping>, StoreError> {
        self.inner.find_by_original_url(url).await
    }

    async fn find_by_short_id(&self, id: &ShortId) -> Result<Option<UrlMapping>, StoreError> {
        if let Some(mapping) = self.cached(id).await {
            return Ok(Some(mapping));
        }

        let mapping = self.inner.find_by_short_id(id).await?;
        if let Some(mapping) = &mapping {
            self.warm(mapping.clone());
        }

        Ok(mapping)
    }

    async fn insert(&self, mapping: &UrlMapping) -> Result<(), StoreError> {
        self.inner.insert(mapping).await?;
        // A fresh short url is usually followed right away.
        self.warm(mapping.clone());

        Ok(())
    }
}
