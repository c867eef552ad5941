// ============================================================================
// Resource cache
// ============================================================================
//
// Tag-indexed cache of serialized entities plus a repository wrapper that
// reads through it and invalidates by tag after writes. Invalidation issued
// inside a transaction is queued on the transaction and runs only if it
// commits.

pub mod memory;
pub mod repository;

pub use memory::LruResourceCache;
pub use repository::CachedRepository;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::core::Result;

pub const DEFAULT_CAPACITY: usize = 1024;

/// A key/value cache whose entries can be dropped in bulk by tag.
#[async_trait]
pub trait ResourceCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>>;

    /// Stores `value` under `key`, replacing any previous entry and its tags.
    async fn put(&self, key: String, value: JsonValue, tags: Vec<String>) -> Result<()>;

    /// Drops every entry carrying any of `tags`. Returns how many were dropped.
    async fn forget_by_tags(&self, tags: &[String]) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    pub capacity: usize,

    /// Prepended to every key and tag, e.g. a schema version
    pub resource_prefix: String,

    /// When off, reads go straight to the repository and nothing is invalidated
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            resource_prefix: String::new(),
            enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn resource_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.resource_prefix = prefix.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub(crate) fn prefixed(&self, raw: String) -> String {
        if self.resource_prefix.is_empty() {
            raw
        } else {
            format!("{}:{}", self.resource_prefix, raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_applies_only_when_set() {
        let plain = CacheConfig::default();
        assert_eq!(plain.prefixed("User:1".into()), "User:1");

        let versioned = CacheConfig::new().resource_prefix("v7");
        assert_eq!(versioned.prefixed("User:1".into()), "v7:User:1");
    }
}
