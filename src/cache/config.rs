//! Cache configuration.
//!
//! Controls the field-level result cache via `grafite.toml`.

use std::num::NonZeroUsize;

use crate::domain::types::RecordField;

const DEFAULT_ENTRY_LIMIT: usize = 1024;
const DEFAULT_MAX_VALUE_BYTES: usize = 65536;

/// Field-cache configuration from `grafite.toml`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Enable the in-memory field cache.
    pub enabled: bool,
    /// Maximum number of cached field slots.
    pub entry_limit: usize,
    /// Largest value admitted into the cache, in bytes.
    pub max_value_bytes: usize,
    /// When set, only this field is ever cached.
    pub cacheable_field: Option<RecordField>,
    /// Serve `image` as a relative stored path instead of an absolute URL.
    pub image_returns_relative_path: bool,
    /// Also cache the data URL when a freshly compiled record is persisted.
    pub data_url_on_save: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entry_limit: DEFAULT_ENTRY_LIMIT,
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            cacheable_field: None,
            image_returns_relative_path: true,
            data_url_on_save: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            entry_limit: settings.entry_limit,
            max_value_bytes: settings.max_value_bytes,
            cacheable_field: settings.cacheable_field,
            image_returns_relative_path: settings.image_returns_relative_path,
            data_url_on_save: settings.data_url_on_save,
        }
    }
}

impl CacheConfig {
    /// Whether `field` may be cached under the current restrictions. The
    /// error slot is exempt from the single-field restriction; it backs the
    /// fast path for known-bad sources.
    pub fn is_cacheable(&self, field: RecordField) -> bool {
        if !self.enabled {
            return false;
        }
        field == RecordField::CompileError
            || self.cacheable_field.is_none_or(|only| only == field)
    }

    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn entry_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.entry_limit).unwrap_or(NonZeroUsize::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.entry_limit, 1024);
        assert_eq!(config.max_value_bytes, 65536);
        assert!(config.cacheable_field.is_none());
        assert!(config.image_returns_relative_path);
        assert!(!config.data_url_on_save);
    }

    #[test]
    fn every_field_cacheable_without_restriction() {
        let config = CacheConfig::default();
        assert!(config.is_cacheable(RecordField::Image));
        assert!(config.is_cacheable(RecordField::DataUrl));
        assert!(config.is_cacheable(RecordField::CompileError));
    }

    #[test]
    fn single_field_mode_restricts_other_fields() {
        let config = CacheConfig {
            cacheable_field: Some(RecordField::DataUrl),
            ..Default::default()
        };
        assert!(config.is_cacheable(RecordField::DataUrl));
        assert!(!config.is_cacheable(RecordField::Image));
    }

    #[test]
    fn error_slot_is_exempt_from_single_field_mode() {
        let config = CacheConfig {
            cacheable_field: Some(RecordField::DataUrl),
            ..Default::default()
        };
        assert!(config.is_cacheable(RecordField::CompileError));
    }

    #[test]
    fn disabled_cache_admits_nothing() {
        let config = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!config.is_cacheable(RecordField::DataUrl));
    }

    #[test]
    fn entry_limit_clamps_to_min() {
        let config = CacheConfig {
            entry_limit: 0,
            ..Default::default()
        };
        assert_eq!(config.entry_limit_non_zero().get(), 1);
    }
}
