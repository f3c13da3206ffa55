//! Persisted-cache contract
//!
//! The relational persistence layer is an external collaborator; the core
//! produces one row per tag and one row per data set, upserted in bulk once
//! per poll cycle, and consumes them for read-back. [`CacheStore`] is that
//! contract; [`MemoryCacheStore`] backs the standalone service and tests.

mod memory;

pub use memory::MemoryCacheStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::values::PlcValue;
use crate::utils::error::Result;

/// Latest decoded value of one tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCacheEntry {
    pub key: String,
    pub value: PlcValue,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

/// Latest raw words of one data set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSetCacheEntry {
    pub data_set_id: i64,
    pub length: u16,
    pub values: Vec<u16>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

/// Last-value cache persistence, bulk-upserted once per poll cycle
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Upsert one row per tag; last value wins
    async fn save_tag_cache_bulk(&self, rows: Vec<TagCacheEntry>) -> Result<()>;

    /// Upsert one row per data set
    async fn upsert_data_set_cache(&self, rows: Vec<DataSetCacheEntry>) -> Result<()>;

    /// Fetch one tag row
    async fn tag_cache(&self, key: &str) -> Result<Option<TagCacheEntry>>;

    /// Fetch every tag row
    async fn all_tag_cache(&self) -> Result<Vec<TagCacheEntry>>;

    /// Fetch one data set row
    async fn data_set_cache(&self, data_set_id: i64) -> Result<Option<DataSetCacheEntry>>;

    /// Drop every cached row
    async fn clear(&self) -> Result<()>;
}
