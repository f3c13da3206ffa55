//! DataSet/Tag polling engine
//!
//! Each enabled data set is a named, contiguous range of controller memory
//! read as one unit on its own repeating timer. Every cycle reads the whole
//! block in a single wire round trip, then decodes each tag defined against
//! the block and bulk-upserts the cache rows. One tag failing to decode
//! never stops its siblings; one failed cycle never stops the next.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::core::device::DeviceCode;
use crate::core::traits::{Communication, StringEncoding};
use crate::core::values::{decode_value, encode_value, PlcValue, TagType};
use crate::storage::{CacheStore, DataSetCacheEntry, TagCacheEntry};
use crate::utils::error::{McSrvError, Result};

/// Smallest accepted polling period
pub const MIN_POLLING_INTERVAL_MS: u64 = 10;

fn default_polling_interval() -> u64 {
    1000
}

fn default_enabled() -> bool {
    true
}

/// A named, contiguous range of controller memory polled as one unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSet {
    pub id: i64,
    pub name: String,
    pub device: DeviceCode,
    pub start_address: u32,
    pub length: u16,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DataSet {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(McSrvError::InvalidParameter(format!(
                "Data set {} has an empty name",
                self.id
            )));
        }
        if self.length == 0 {
            return Err(McSrvError::InvalidParameter(format!(
                "Data set '{}' must be at least one word long",
                self.name
            )));
        }
        if self.polling_interval_ms < MIN_POLLING_INTERVAL_MS {
            return Err(McSrvError::InvalidParameter(format!(
                "Data set '{}' polling interval {}ms is below the {}ms minimum",
                self.name, self.polling_interval_ms, MIN_POLLING_INTERVAL_MS
            )));
        }
        Ok(())
    }
}

/// A typed scalar defined at a word/bit offset inside a data set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub data_set_id: i64,
    pub offset: u16,
    pub data_type: TagType,
    #[serde(default)]
    pub word_length: Option<u16>,
    #[serde(default)]
    pub bit_position: Option<u8>,
}

impl Tag {
    /// Declared word length, defaulting per type
    pub fn effective_word_length(&self) -> u16 {
        self.word_length
            .unwrap_or_else(|| self.data_type.default_word_length())
    }

    /// Check the tag layout against its owning data set
    pub fn validate_against(&self, data_set: &DataSet) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(McSrvError::InvalidParameter(
                "Tag key must not be empty".to_string(),
            ));
        }
        let end = self.offset as u32 + self.effective_word_length() as u32;
        if end > data_set.length as u32 {
            return Err(McSrvError::InvalidParameter(format!(
                "Tag '{}' at offset {} (+{} words) exceeds data set '{}' length {}",
                self.key,
                self.offset,
                self.effective_word_length(),
                data_set.name,
                data_set.length
            )));
        }
        if self.data_type == TagType::Bool {
            match self.bit_position {
                None => {
                    return Err(McSrvError::InvalidParameter(format!(
                        "Bit position is required for bool tag '{}'",
                        self.key
                    )))
                }
                Some(bit) if bit > 15 => {
                    return Err(McSrvError::InvalidParameter(format!(
                        "Bit position {} out of range for tag '{}'",
                        bit, self.key
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Polling throughput counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PollingMetrics {
    pub read_count: u64,
    pub reads_per_second: u64,
    pub elapsed_seconds: u64,
}

/// In-memory raw words of one data set from its most recent cycle
#[derive(Debug, Clone)]
struct RawBlock {
    values: Vec<u16>,
    length: u16,
    timestamp: chrono::DateTime<Utc>,
    error: Option<String>,
}

#[derive(Default)]
struct PollerTables {
    data_sets: HashMap<i64, DataSet>,
    tags_by_set: HashMap<i64, Vec<Tag>>,
    tags_by_key: HashMap<String, Tag>,
}

/// Polls data sets on independent timers and keeps the cache store current
pub struct TagPoller {
    client: Arc<dyn Communication>,
    store: Arc<dyn CacheStore>,
    tables: RwLock<PollerTables>,
    timers: Mutex<HashMap<i64, JoinHandle<()>>>,
    raw_cache: Arc<DashMap<i64, RawBlock>>,
    active: AtomicBool,
    read_count: Arc<AtomicU64>,
    started_at: Mutex<Option<Instant>>,
}

impl TagPoller {
    pub fn new(client: Arc<dyn Communication>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            client,
            store,
            tables: RwLock::new(PollerTables::default()),
            timers: Mutex::new(HashMap::new()),
            raw_cache: Arc::new(DashMap::new()),
            active: AtomicBool::new(false),
            read_count: Arc::new(AtomicU64::new(0)),
            started_at: Mutex::new(None),
        }
    }

    /// Replace the data set and tag tables after validating them
    pub async fn set_configuration(&self, data_sets: Vec<DataSet>, tags: Vec<Tag>) -> Result<()> {
        let mut tables = PollerTables::default();
        for data_set in data_sets {
            data_set.validate()?;
            if tables
                .data_sets
                .values()
                .any(|existing| existing.name == data_set.name)
            {
                return Err(McSrvError::InvalidParameter(format!(
                    "Duplicate data set name '{}'",
                    data_set.name
                )));
            }
            if tables.data_sets.insert(data_set.id, data_set).is_some() {
                return Err(McSrvError::InvalidParameter(
                    "Duplicate data set id".to_string(),
                ));
            }
        }
        for tag in tags {
            let data_set = tables.data_sets.get(&tag.data_set_id).ok_or_else(|| {
                McSrvError::NotFound(format!(
                    "Tag '{}' references unknown data set {}",
                    tag.key, tag.data_set_id
                ))
            })?;
            tag.validate_against(data_set)?;
            if tables
                .tags_by_key
                .insert(tag.key.clone(), tag.clone())
                .is_some()
            {
                return Err(McSrvError::InvalidParameter(format!(
                    "Duplicate tag key '{}'",
                    tag.key
                )));
            }
            tables
                .tags_by_set
                .entry(tag.data_set_id)
                .or_default()
                .push(tag);
        }
        *self.tables.write().await = tables;
        Ok(())
    }

    /// Start one timer per enabled data set; the first poll runs immediately
    pub async fn start_polling(&self) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            warn!("Polling already active");
            return Ok(());
        }

        if !self.client.is_connection_active().await {
            self.client.connect().await?;
        }

        self.read_count.store(0, Ordering::SeqCst);
        *self.started_at.lock().await = Some(Instant::now());

        info!("Starting data set polling");
        let enabled: Vec<i64> = {
            let tables = self.tables.read().await;
            tables
                .data_sets
                .values()
                .filter(|ds| ds.enabled)
                .map(|ds| ds.id)
                .collect()
        };
        for id in enabled {
            self.start_data_set(id).await?;
        }
        Ok(())
    }

    /// Stop every timer and drop the in-memory raw caches.
    ///
    /// The persisted cache store keeps its rows; only the in-memory state is
    /// cleared.
    pub async fn stop_polling(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("Stopping all data set polling");
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        self.raw_cache.clear();
        self.read_count.store(0, Ordering::SeqCst);
        *self.started_at.lock().await = None;
    }

    pub fn is_polling(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn (or restart) the repeating poll task for one data set
    pub async fn start_data_set(&self, data_set_id: i64) -> Result<()> {
        let (data_set, tags) = {
            let tables = self.tables.read().await;
            let data_set = tables
                .data_sets
                .get(&data_set_id)
                .ok_or_else(|| McSrvError::NotFound(format!("Data set {}", data_set_id)))?
                .clone();
            let tags = tables
                .tags_by_set
                .get(&data_set_id)
                .cloned()
                .unwrap_or_default();
            (data_set, tags)
        };

        self.stop_data_set(data_set_id).await;
        info!(
            "Start polling data set '{}' ({}{}..{}) every {}ms",
            data_set.name,
            data_set.device,
            data_set.start_address,
            data_set.start_address + data_set.length as u32 - 1,
            data_set.polling_interval_ms
        );

        let client = self.client.clone();
        let store = self.store.clone();
        let raw_cache = self.raw_cache.clone();
        let read_count = self.read_count.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(data_set.polling_interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                poll_data_set(&client, &store, &raw_cache, &read_count, &data_set, &tags).await;
            }
        });
        self.timers.lock().await.insert(data_set_id, handle);
        Ok(())
    }

    /// Cancel one data set's timer and drop its raw cache
    pub async fn stop_data_set(&self, data_set_id: i64) {
        if let Some(handle) = self.timers.lock().await.remove(&data_set_id) {
            handle.abort();
            self.raw_cache.remove(&data_set_id);
            debug!("Stopped polling data set {}", data_set_id);
        }
    }

    /// Write a whole (or leading part of a) data set and refresh its raw
    /// cache without waiting for the next tick
    pub async fn write_data_set_values(&self, data_set_id: i64, values: Vec<u16>) -> Result<()> {
        let data_set = {
            let tables = self.tables.read().await;
            tables
                .data_sets
                .get(&data_set_id)
                .ok_or_else(|| McSrvError::NotFound(format!("Data set {}", data_set_id)))?
                .clone()
        };
        if values.is_empty() {
            return Err(McSrvError::InvalidData("Values array is empty".to_string()));
        }
        if values.len() > data_set.length as usize {
            return Err(McSrvError::InvalidData(format!(
                "Values length {} exceeds data set length {}",
                values.len(),
                data_set.length
            )));
        }

        self.client
            .write_numbers(data_set.device, data_set.start_address, &values)
            .await?;

        let now = Utc::now();
        self.raw_cache.insert(
            data_set_id,
            RawBlock {
                values: values.clone(),
                length: values.len() as u16,
                timestamp: now,
                error: None,
            },
        );
        self.store
            .upsert_data_set_cache(vec![DataSetCacheEntry {
                data_set_id,
                length: values.len() as u16,
                values,
                timestamp: now,
                error: None,
            }])
            .await
    }

    /// Encode and write one tag's value at its absolute address, then update
    /// its cache row
    pub async fn write_tag_value(&self, key: &str, value: PlcValue) -> Result<()> {
        let (tag, data_set) = {
            let tables = self.tables.read().await;
            let tag = tables
                .tags_by_key
                .get(key)
                .ok_or_else(|| McSrvError::NotFound(format!("Tag '{}'", key)))?
                .clone();
            let data_set = tables
                .data_sets
                .get(&tag.data_set_id)
                .ok_or_else(|| McSrvError::NotFound(format!("Data set {}", tag.data_set_id)))?
                .clone();
            (tag, data_set)
        };

        let address = data_set.start_address + tag.offset as u32;
        match tag.data_type {
            TagType::Int16 | TagType::Int32 | TagType::Real => {
                let words = encode_value(
                    tag.data_type,
                    &value,
                    tag.effective_word_length(),
                    tag.bit_position,
                )?;
                self.client
                    .write_numbers(data_set.device, address, &words)
                    .await?;
            }
            TagType::String => {
                let PlcValue::Text(ref text) = value else {
                    return Err(McSrvError::InvalidParameter(format!(
                        "Value must be a string for tag '{}'",
                        key
                    )));
                };
                self.client
                    .write_string(data_set.device, address, text, StringEncoding::Ascii)
                    .await?;
            }
            TagType::Bool => {
                let PlcValue::Bool(flag) = value else {
                    return Err(McSrvError::InvalidParameter(format!(
                        "Value must be a boolean for tag '{}'",
                        key
                    )));
                };
                let bit = tag.bit_position.ok_or_else(|| {
                    McSrvError::InvalidParameter(format!(
                        "Bit position is required for bool tag '{}'",
                        key
                    ))
                })?;
                self.client
                    .write_bit(data_set.device, address, bit, flag)
                    .await?;
            }
        }

        info!("Wrote value to tag '{}': {}", key, value);
        self.store
            .save_tag_cache_bulk(vec![TagCacheEntry {
                key: key.to_string(),
                value,
                timestamp: Utc::now(),
                error: None,
            }])
            .await
    }

    /// Current in-memory raw blocks, for the external API layer
    pub fn data_set_cache_snapshot(&self) -> Vec<DataSetCacheEntry> {
        self.raw_cache
            .iter()
            .map(|entry| DataSetCacheEntry {
                data_set_id: *entry.key(),
                length: entry.length,
                values: entry.values.clone(),
                timestamp: entry.timestamp,
                error: entry.error.clone(),
            })
            .collect()
    }

    pub async fn metrics(&self) -> PollingMetrics {
        if !self.is_polling() {
            return PollingMetrics::default();
        }
        let started = match *self.started_at.lock().await {
            Some(instant) => instant,
            None => return PollingMetrics::default(),
        };
        let read_count = self.read_count.load(Ordering::SeqCst);
        let elapsed_seconds = started.elapsed().as_secs();
        let reads_per_second = if elapsed_seconds > 0 {
            read_count / elapsed_seconds
        } else {
            0
        };
        PollingMetrics {
            read_count,
            reads_per_second,
            elapsed_seconds,
        }
    }
}

/// One poll cycle: read the whole block, decode every tag, upsert in bulk
async fn poll_data_set(
    client: &Arc<dyn Communication>,
    store: &Arc<dyn CacheStore>,
    raw_cache: &DashMap<i64, RawBlock>,
    read_count: &AtomicU64,
    data_set: &DataSet,
    tags: &[Tag],
) {
    match client
        .read_numbers(data_set.device, data_set.start_address, data_set.length)
        .await
    {
        Ok(raw) => {
            read_count.fetch_add(1, Ordering::Relaxed);
            let now = Utc::now();
            raw_cache.insert(
                data_set.id,
                RawBlock {
                    values: raw.clone(),
                    length: raw.len() as u16,
                    timestamp: now,
                    error: None,
                },
            );

            let mut rows = Vec::with_capacity(tags.len());
            for tag in tags {
                match decode_value(
                    tag.data_type,
                    &raw,
                    tag.offset as usize,
                    tag.effective_word_length(),
                    tag.bit_position,
                ) {
                    Ok(value) => rows.push(TagCacheEntry {
                        key: tag.key.clone(),
                        value,
                        timestamp: now,
                        error: None,
                    }),
                    Err(e) => {
                        warn!("Failed to extract tag '{}': {}", tag.key, e);
                        rows.push(TagCacheEntry {
                            key: tag.key.clone(),
                            value: tag.data_type.empty_value(),
                            timestamp: now,
                            error: Some(e.to_string()),
                        });
                    }
                }
            }
            if let Err(e) = store.save_tag_cache_bulk(rows).await {
                warn!("Failed to store tag cache rows: {}", e);
            }
            if let Err(e) = store
                .upsert_data_set_cache(vec![DataSetCacheEntry {
                    data_set_id: data_set.id,
                    length: raw.len() as u16,
                    values: raw,
                    timestamp: now,
                    error: None,
                }])
                .await
            {
                warn!("Failed to store data set cache row: {}", e);
            }
        }
        Err(e) => {
            error!("Failed to poll data set {} ('{}'): {}", data_set.id, data_set.name, e);
            let now = Utc::now();
            let message = e.to_string();

            let rows = tags
                .iter()
                .map(|tag| TagCacheEntry {
                    key: tag.key.clone(),
                    value: tag.data_type.empty_value(),
                    timestamp: now,
                    error: Some(message.clone()),
                })
                .collect();
            if let Err(err) = store.save_tag_cache_bulk(rows).await {
                warn!("Failed to store tag cache rows: {}", err);
            }

            // the raw block keeps its previous words and length, marked with
            // the failure
            let (length, values) = match raw_cache.get_mut(&data_set.id) {
                Some(mut block) => {
                    block.timestamp = now;
                    block.error = Some(message.clone());
                    (block.length, block.values.clone())
                }
                None => {
                    raw_cache.insert(
                        data_set.id,
                        RawBlock {
                            values: Vec::new(),
                            length: data_set.length,
                            timestamp: now,
                            error: Some(message.clone()),
                        },
                    );
                    (data_set.length, Vec::new())
                }
            };
            if let Err(err) = store
                .upsert_data_set_cache(vec![DataSetCacheEntry {
                    data_set_id: data_set.id,
                    length,
                    values,
                    timestamp: now,
                    error: Some(message),
                }])
                .await
            {
                warn!("Failed to store data set cache row: {}", err);
            }
        }
    }
}
