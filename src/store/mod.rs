pub mod cached;
pub mod memory;
pub mod mongo;

use async_trait::async_trait;

use crate::{
    error::StoreError,
    models::{ShortId, UrlMapping},
};

pub use cached::{CachedStore, RedisCache};
pub use memory::InMemoryStore;
pub use mongo::MongoStore;

/// Persistence for url mappings.
///
/// Implementations must enforce uniqueness of both `short_id` and
/// `original_url` atomically in `insert`.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn find_by_original_url(&self, url: &str) -> Result<Option<UrlMapping>, StoreError>;

    async fn find_by_short_id(&self, id: &ShortId) -> Result<Option<UrlMapping>, StoreError>;

    /// Fails with `StoreError::DuplicateKey` naming the violated field when
    /// either key is already taken.
    async fn insert(&self, mapping: &UrlMapping) -> Result<(), StoreError>;
}
