//! Field-cache storage implementations.
//!
//! One LRU map of field slots over the durable store. Values are small:
//! compile errors, data URLs, and image descriptors. Anything above the byte
//! ceiling stays out of the cache and is served from the store.

use std::sync::RwLock;

use lru::LruCache;
use metrics::counter;

use super::config::CacheConfig;
use super::lock::rw_write;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "grafite_field_cache_hit_total";
const METRIC_CACHE_MISS: &str = "grafite_field_cache_miss_total";
const METRIC_CACHE_REJECT: &str = "grafite_field_cache_reject_total";

/// A cached field value.
///
/// Image slots hold the relative stored path plus the file size rather than
/// the bytes themselves; URL materialization happens per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    Text(String),
    Image { path: String, size: u64 },
}

impl CachedValue {
    fn approx_bytes(&self) -> usize {
        match self {
            CachedValue::Text(text) => text.len(),
            CachedValue::Image { path, .. } => path.len() + size_of::<u64>(),
        }
    }
}

/// The fast lookup layer in front of the durable store.
///
/// `add` is add-if-absent: a present slot is never overwritten, so the first
/// writer wins and concurrent populators stay consistent.
pub trait FieldCache: Send + Sync {
    fn get(&self, slot: &str) -> Option<CachedValue>;
    fn add(&self, slot: &str, value: CachedValue) -> bool;
    fn delete(&self, slot: &str);
}

/// In-memory LRU field cache.
pub struct MemoryFieldCache {
    slots: RwLock<LruCache<String, CachedValue>>,
    max_value_bytes: usize,
}

impl MemoryFieldCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            slots: RwLock::new(LruCache::new(config.entry_limit_non_zero())),
            max_value_bytes: config.max_value_bytes,
        }
    }
}

impl FieldCache for MemoryFieldCache {
    fn get(&self, slot: &str) -> Option<CachedValue> {
        // LruCache::get reorders, so reads take the write lock.
        let value = rw_write(&self.slots, SOURCE, "get").get(slot).cloned();
        match value {
            Some(_) => counter!(METRIC_CACHE_HIT).increment(1),
            None => counter!(METRIC_CACHE_MISS).increment(1),
        }
        value
    }

    fn add(&self, slot: &str, value: CachedValue) -> bool {
        if value.approx_bytes() > self.max_value_bytes {
            counter!(METRIC_CACHE_REJECT).increment(1);
            return false;
        }
        let mut slots = rw_write(&self.slots, SOURCE, "add");
        if slots.contains(slot) {
            return false;
        }
        slots.push(slot.to_string(), value);
        true
    }

    fn delete(&self, slot: &str) {
        rw_write(&self.slots, SOURCE, "delete").pop(slot);
    }
}

/// Cache absence as an implementation, so callers never branch on a flag.
pub struct NoopFieldCache;

impl FieldCache for NoopFieldCache {
    fn get(&self, _slot: &str) -> Option<CachedValue> {
        None
    }

    fn add(&self, _slot: &str, _value: CachedValue) -> bool {
        false
    }

    fn delete(&self, _slot: &str) {}
}

impl MemoryFieldCache {
    /// Number of live slots; test support.
    #[cfg(test)]
    fn len(&self) -> usize {
        rw_write(&self.slots, SOURCE, "len").len()
    }
}
