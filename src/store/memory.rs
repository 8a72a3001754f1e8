use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use super::MappingStore;
use crate::{
    error::{StoreError, UniqueField},
    models::{ShortId, UrlMapping},
};

/// In-memory store. Both indexes are `DashMap`s; `insert` always locks the
/// url shard before the id shard, so the pair is claimed atomically.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    by_short_id: DashMap<ShortId, String>,
    by_original_url: DashMap<String, ShortId>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.by_short_id.len()
    }
}

#[async_trait]
impl MappingStore for InMemoryStore {
    async fn find_by_original_url(&self, url: &str) -> Result<Option<UrlMapping>, StoreError> {
        Ok(self.by_original_url.get(url).map(|id| UrlMapping {
            original_url: url.to_owned(),
            short_id: id.value().clone(),
        }))
    }

    async fn find_by_short_id(&self, id: &ShortId) -> Result<Option<UrlMapping>, StoreError> {
        Ok(self.by_short_id.get(id).map(|url| UrlMapping {
            original_url: url.value().clone(),
            short_id: id.clone(),
        }))
    }

    async fn insert(&self, mapping: &UrlMapping) -> Result<(), StoreError> {
        let Entry::Vacant(url_slot) = self.by_original_url.entry(mapping.original_url.clone()) else {
            return Err(StoreError::DuplicateKey(UniqueField::OriginalUrl));
        };
        let Entry::Vacant(id_slot) = self.by_short_id.entry(mapping.short_id.clone()) else {
            return Err(StoreError::DuplicateKey(UniqueField::ShortId));
        };

        id_slot.insert(mapping.original_url.clone());
        url_slot.insert(mapping.short_id.clone());
        Ok(())
    }
}
