use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use super::{CacheConfig, ResourceCache};
use crate::core::{EntityId, Result, Value};
use crate::diff::Diffable;
use crate::repository::Repository;
use crate::transaction::Tx;

const LIST_SUFFIX: &str = "list";

/// A [`Repository`] that reads through a [`ResourceCache`].
///
/// Only `find_by_id` and `find_all` are cached; predicate reads always hit the
/// store. Reads inside a transaction bypass the cache so they observe the
/// transaction's own writes and capture baselines as usual. Every write
/// forgets the tags `<Resource>:<id>` and `<Resource>:list`: immediately when
/// no transaction is bound, otherwise once the transaction commits.
pub struct CachedRepository<T> {
    inner: Repository<T>,
    cache: Arc<dyn ResourceCache>,
    config: CacheConfig,
}

impl<T> Clone for CachedRepository<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cache: self.cache.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T> CachedRepository<T>
where
    T: Diffable + Default + Serialize + DeserializeOwned,
{
    pub fn new(inner: Repository<T>, cache: Arc<dyn ResourceCache>, config: CacheConfig) -> Self {
        Self {
            inner,
            cache,
            config,
        }
    }

    pub fn with_tx(&self, tx: &Tx) -> Self {
        Self {
            inner: self.inner.with_tx(tx),
            cache: self.cache.clone(),
            config: self.config.clone(),
        }
    }

    pub fn repository(&self) -> &Repository<T> {
        &self.inner
    }

    pub fn cache(&self) -> &Arc<dyn ResourceCache> {
        &self.cache
    }

    pub fn tx(&self) -> Option<&Tx> {
        self.inner.tx()
    }

    pub async fn begin_transaction(&self) -> Result<Tx> {
        self.inner.begin_transaction().await
    }

    /// `<Resource>:<suffix>`, with the configured prefix.
    pub fn tag(&self, suffix: &str) -> String {
        self.config
            .prefixed(format!("{}:{}", T::entity_name(), suffix))
    }

    fn id_tag(&self, id: &EntityId) -> String {
        self.tag(&id.to_string())
    }

    fn bypass(&self) -> bool {
        !self.config.enabled || self.inner.tx().is_some()
    }

    pub async fn find_by_id(&self, id: impl Into<EntityId>) -> Result<T> {
        let id = id.into();
        if self.bypass() {
            return self.inner.find_by_id(id).await;
        }

        let key = self.id_tag(&id);
        if let Some(entity) = self.cached::<T>(&key).await? {
            return Ok(entity);
        }

        let entity = self.inner.find_by_id(id.clone()).await?;
        self.remember(key, &entity, vec![self.id_tag(&id)]).await;
        Ok(entity)
    }

    pub async fn find_all(&self) -> Result<Vec<T>> {
        if self.bypass() {
            return self.inner.find_all().await;
        }

        let key = self.tag(LIST_SUFFIX);
        if let Some(entities) = self.cached::<Vec<T>>(&key).await? {
            return Ok(entities);
        }

        let entities = self.inner.find_all().await?;
        let mut tags: Vec<String> = entities
            .iter()
            .filter_map(|entity| entity.identity())
            .map(|id| self.id_tag(&id))
            .collect();
        tags.push(self.tag(LIST_SUFFIX));
        self.remember(key, &entities, tags).await;
        Ok(entities)
    }

    pub async fn find_one<P>(&self, predicate: P) -> Result<Option<T>>
    where
        P: Fn(&T) -> bool,
    {
        self.inner.find_one(predicate).await
    }

    pub async fn find_many<P>(&self, predicate: P) -> Result<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        self.inner.find_many(predicate).await
    }

    pub async fn create(&self, entity: &T) -> Result<T> {
        let created = self.inner.create(entity).await?;
        self.invalidate(created.identity()).await?;
        Ok(created)
    }

    pub async fn save(&self, entity: &T) -> Result<T> {
        let saved = self.inner.save(entity).await?;
        self.invalidate(saved.identity()).await?;
        Ok(saved)
    }

    pub async fn update_by_id(&self, id: impl Into<EntityId>, entity: &mut T) -> Result<()> {
        let id = id.into();
        self.inner.update_by_id(id.clone(), entity).await?;
        self.invalidate(Some(id)).await
    }

    pub async fn update_by_id_in_place<F>(
        &self,
        id: impl Into<EntityId>,
        entity: &mut T,
        mutate: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        let id = id.into();
        self.inner
            .update_by_id_in_place(id.clone(), entity, mutate)
            .await?;
        self.invalidate(Some(id)).await
    }

    pub async fn update_in_place<F>(&self, entity: &mut T, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        self.inner.update_in_place(entity, mutate).await?;
        self.invalidate(entity.identity()).await
    }

    /// Cache invalidation failures are logged; the updated entity is still returned.
    pub async fn update_by_id_with_map(
        &self,
        id: impl Into<EntityId>,
        values: BTreeMap<String, Value>,
    ) -> Result<T> {
        let id = id.into();
        let updated = self.inner.update_by_id_with_map(id.clone(), values).await?;
        if let Err(err) = self.invalidate(Some(id)).await {
            warn!("Cache invalidation after map update failed: {}", err);
        }
        Ok(updated)
    }

    pub async fn delete_by_id(&self, id: impl Into<EntityId>) -> Result<bool> {
        let id = id.into();
        let deleted = self.inner.delete_by_id(id.clone()).await?;
        self.invalidate(Some(id)).await?;
        Ok(deleted)
    }

    async fn invalidate(&self, id: Option<EntityId>) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut tags = Vec::with_capacity(2);
        if let Some(id) = &id {
            tags.push(self.id_tag(id));
        }
        tags.push(self.tag(LIST_SUFFIX));

        match self.inner.tx() {
            Some(tx) => {
                debug!("Queued invalidation of {:?} on {}", tags, tx.id());
                let cache = self.cache.clone();
                tx.queue_deferred(move || async move {
                    cache.forget_by_tags(&tags).await.map(|_| ())
                });
                Ok(())
            }
            None => {
                self.cache.forget_by_tags(&tags).await?;
                Ok(())
            }
        }
    }

    async fn cached<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        let Some(raw) = self.cache.get(key).await? else {
            debug!("Cache miss: {}", key);
            return Ok(None);
        };
        match serde_json::from_value(raw) {
            Ok(value) => {
                trace!("Cache hit: {}", key);
                Ok(Some(value))
            }
            Err(err) => {
                warn!("Discarding undecodable cache entry {}: {}", key, err);
                Ok(None)
            }
        }
    }

    async fn remember<V: Serialize>(&self, key: String, value: &V, tags: Vec<String>) {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(err) => {
                warn!("Not caching {}: {}", key, err);
                return;
            }
        };
        if let Err(err) = self.cache.put(key.clone(), json, tags).await {
            warn!("Failed to set cache {}: {}", key, err);
        }
    }
}
