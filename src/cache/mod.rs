//! Field-level result cache.
//!
//! Sits between the HTTP layer and the durable store: `(tex_key, field)`
//! slots with LRU eviction, a byte ceiling, and add-if-absent population.

pub mod config;
pub mod keys;
mod lock;
pub mod store;

use std::sync::Arc;

pub use config::CacheConfig;
pub use keys::field_cache_key;
pub use store::{CachedValue, FieldCache, MemoryFieldCache, NoopFieldCache};

/// Build the configured cache implementation.
pub fn build_field_cache(config: &CacheConfig) -> Arc<dyn FieldCache> {
    if config.enabled {
        Arc::new(MemoryFieldCache::new(config))
    } else {
        Arc::new(NoopFieldCache)
    }
}
