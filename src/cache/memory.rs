use std::collections::{HashMap, HashSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::ResourceCache;
use crate::core::Result;

struct Entry {
    value: JsonValue,
    tags: Vec<String>,
}

struct LruState {
    entries: LruCache<String, Entry>,
    /// tag -> keys carrying it
    tags: HashMap<String, HashSet<String>>,
}

impl LruState {
    fn unindex(&mut self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }
}

/// In-process [`ResourceCache`] bounded by entry count.
pub struct LruResourceCache {
    state: Mutex<LruState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LruResourceCache {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(LruState {
                entries: LruCache::new(capacity),
                tags: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.state.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock()?.entries.contains(key))
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        state.entries.clear();
        state.tags.clear();
        Ok(())
    }
}

impl Default for LruResourceCache {
    fn default() -> Self {
        Self::new(super::DEFAULT_CAPACITY)
    }
}

impl fmt::Debug for LruResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruResourceCache")
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

#[async_trait]
impl ResourceCache for LruResourceCache {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        let mut state = self.state.lock()?;
        let found = state.entries.get(key).map(|entry| entry.value.clone());
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(found)
    }

    async fn put(&self, key: String, value: JsonValue, tags: Vec<String>) -> Result<()> {
        let mut state = self.state.lock()?;

        for tag in &tags {
            state.tags.entry(tag.clone()).or_default().insert(key.clone());
        }

        // `push` hands back either the replaced entry for `key` or the evicted LRU entry.
        if let Some((old_key, old)) = state.entries.push(key.clone(), Entry { value, tags }) {
            let stale: Vec<String> = if old_key == key {
                let current = state
                    .entries
                    .peek(&key)
                    .map(|entry| entry.tags.clone())
                    .unwrap_or_default();
                old.tags.into_iter().filter(|tag| !current.contains(tag)).collect()
            } else {
                debug!("Evicted cache entry {}", old_key);
                old.tags
            };
            state.unindex(&old_key, &stale);
        }
        Ok(())
    }

    async fn forget_by_tags(&self, tags: &[String]) -> Result<usize> {
        let mut state = self.state.lock()?;

        let mut keys = HashSet::new();
        for tag in tags {
            if let Some(tagged) = state.tags.remove(tag) {
                keys.extend(tagged);
            }
        }

        let mut dropped = 0;
        for key in keys {
            if let Some(entry) = state.entries.pop(&key) {
                state.unindex(&key, &entry.tags);
                dropped += 1;
            }
        }

        debug!("Forgot {} cache entries for tags {:?}", dropped, tags);
        Ok(dropped)
    }
}
