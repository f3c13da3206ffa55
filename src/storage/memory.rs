//! In-memory cache store
//!
//! Backs the standalone service and the test suite. Entries live in
//! concurrent maps; semantics match the persisted store: upserts overwrite
//! in place, last value wins.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheStore, DataSetCacheEntry, TagCacheEntry};
use crate::utils::error::Result;

#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    tags: DashMap<String, TagCacheEntry>,
    data_sets: DashMap<i64, DataSetCacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn save_tag_cache_bulk(&self, rows: Vec<TagCacheEntry>) -> Result<()> {
        for row in rows {
            self.tags.insert(row.key.clone(), row);
        }
        Ok(())
    }

    async fn upsert_data_set_cache(&self, rows: Vec<DataSetCacheEntry>) -> Result<()> {
        for row in rows {
            self.data_sets.insert(row.data_set_id, row);
        }
        Ok(())
    }

    async fn tag_cache(&self, key: &str) -> Result<Option<TagCacheEntry>> {
        Ok(self.tags.get(key).map(|r| r.clone()))
    }

    async fn all_tag_cache(&self) -> Result<Vec<TagCacheEntry>> {
        Ok(self.tags.iter().map(|r| r.clone()).collect())
    }

    async fn data_set_cache(&self, data_set_id: i64) -> Result<Option<DataSetCacheEntry>> {
        Ok(self.data_sets.get(&data_set_id).map(|r| r.clone()))
    }

    async fn clear(&self) -> Result<()> {
        self.tags.clear();
        self.data_sets.clear();
        Ok(())
    }
}
