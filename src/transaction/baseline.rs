use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::EntityId;

/// Entity type plus identity; the baseline key inside one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub entity_type: &'static str,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(entity_type: &'static str, id: EntityId) -> Self {
        Self { entity_type, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.entity_type, self.id)
    }
}

/// Snapshots of entities as first seen by a transaction.
///
/// First write wins: a later read of the same entity never replaces its
/// baseline, so diffs are always taken against the original state.
#[derive(Default)]
pub struct BaselineStore {
    entries: RwLock<HashMap<EntityKey, Arc<dyn Any + Send + Sync>>>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `snapshot` unless a baseline already exists. Returns whether it was stored.
    pub fn put_if_absent<T>(&self, key: EntityKey, snapshot: T) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, Arc::new(snapshot));
        true
    }

    /// Copy of the baseline for `key`, or `None` when nothing was captured
    /// (or it was captured as another type).
    pub fn get_or_nil<T>(&self, key: &EntityKey) -> Option<T>
    where
        T: Clone + 'static,
    {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .and_then(|snapshot| snapshot.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for BaselineStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaselineStore")
            .field("entries", &self.len())
            .finish()
    }
}
