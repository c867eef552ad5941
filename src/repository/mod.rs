//! Typed CRUD over a [`Store`] with diff-based partial updates.
//!
//! Inside a transaction every read records the entity's first-seen state; an
//! update then sends only what changed relative to that baseline, with
//! document fields narrowed to the leaves that moved.

pub mod config;

pub use config::RepositoryConfig;

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{Instrument, debug, info_span};

use crate::core::{DbError, EntityId, Result, Value};
use crate::diff::{ChangeSet, Diffable};
use crate::patch::{ColumnTypeResolver, PatchCompiler, SchemaSource};
use crate::storage::{Scope, Store};
use crate::transaction::{EntityKey, Tx};

/// One page of [`Repository::find_paginated`].
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub current_page: usize,
    pub last_page: usize,
}

pub struct Repository<T> {
    store: Arc<dyn Store>,
    compiler: PatchCompiler,
    config: RepositoryConfig,
    tx: Option<Tx>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            compiler: self.compiler.clone(),
            config: self.config.clone(),
            tx: self.tx.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &std::any::type_name::<T>())
            .field("config", &self.config)
            .field("tx", &self.tx.as_ref().map(Tx::id))
            .finish()
    }
}

impl<T> Repository<T>
where
    T: Diffable + Default,
{
    /// Builds a repository over `store`, sharing `resolver`'s subtype cache.
    pub fn new(store: Arc<dyn Store>, resolver: ColumnTypeResolver, config: RepositoryConfig) -> Self {
        let compiler = PatchCompiler::new(resolver.with_default_subtype(config.default_subtype))
            .strict_serialization(config.strict_serialization);
        Self {
            store,
            compiler,
            config,
            tx: None,
            _entity: PhantomData,
        }
    }

    /// Builds a repository whose column metadata comes from the store itself.
    pub fn from_store<S>(store: Arc<S>, config: RepositoryConfig) -> Self
    where
        S: Store + SchemaSource + 'static,
    {
        let resolver = ColumnTypeResolver::new(store.clone());
        Self::new(store, resolver, config)
    }

    /// A handle bound to `tx`: every operation runs inside it.
    pub fn with_tx(&self, tx: &Tx) -> Self {
        let mut bound = self.clone();
        bound.tx = Some(tx.clone());
        bound
    }

    /// A handle for a different entity type over the same store and resolver cache.
    pub fn sibling<U: Diffable + Default>(&self) -> Repository<U> {
        Repository {
            store: self.store.clone(),
            compiler: self.compiler.clone(),
            config: self.config.clone(),
            tx: self.tx.clone(),
            _entity: PhantomData,
        }
    }

    pub fn tx(&self) -> Option<&Tx> {
        self.tx.as_ref()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn resolver(&self) -> &ColumnTypeResolver {
        self.compiler.resolver()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Opens a new top-level transaction on this repository's store.
    pub async fn begin_transaction(&self) -> Result<Tx> {
        Tx::begin(self.store.clone()).await
    }

    pub async fn find_by_id(&self, id: impl Into<EntityId>) -> Result<T> {
        let id = id.into();
        let scope = self.scope()?;
        let row = self
            .store
            .fetch(scope, T::table_name(), &id)
            .await?
            .ok_or_else(|| DbError::NotFound(T::entity_name().to_string(), id.to_string()))?;
        let entity = T::from_row(&row)?;
        self.capture(&entity);
        Ok(entity)
    }

    /// First entity matching `predicate`, in store order.
    pub async fn find_one<P>(&self, predicate: P) -> Result<Option<T>>
    where
        P: Fn(&T) -> bool,
    {
        let scope = self.scope()?;
        for row in self.store.fetch_all(scope, T::table_name()).await? {
            let entity = T::from_row(&row)?;
            if predicate(&entity) {
                self.capture(&entity);
                return Ok(Some(entity));
            }
        }
        Ok(None)
    }

    pub async fn find_many<P>(&self, predicate: P) -> Result<Vec<T>>
    where
        P: Fn(&T) -> bool,
    {
        let scope = self.scope()?;
        let mut found = Vec::new();
        for row in self.store.fetch_all(scope, T::table_name()).await? {
            let entity = T::from_row(&row)?;
            if predicate(&entity) {
                found.push(entity);
            }
        }
        if self.config.capture_on_list {
            found.iter().for_each(|entity| self.capture(entity));
        }
        Ok(found)
    }

    pub async fn find_all(&self) -> Result<Vec<T>> {
        self.find_many(|_| true).await
    }

    /// `page` is 1-based. Pages past the end come back empty.
    pub async fn find_paginated(&self, page: usize, page_size: usize) -> Result<Page<T>> {
        if page == 0 || page_size == 0 {
            return Err(DbError::InvalidChangeSet(
                "page and page size must be at least 1".to_string(),
            ));
        }
        let all = self.find_all().await?;
        let total = all.len();
        let offset = (page - 1) * page_size;
        let data: Vec<T> = all.into_iter().skip(offset).take(page_size).collect();
        Ok(Page {
            data,
            total,
            limit: page_size,
            offset,
            current_page: page,
            last_page: total.div_ceil(page_size),
        })
    }

    pub async fn create(&self, entity: &T) -> Result<T> {
        let scope = self.scope()?;
        let row = self.store.insert(scope, T::table_name(), entity.to_row()?).await?;
        let created = T::from_row(&row)?;
        if self.config.capture_on_create {
            self.capture(&created);
        }
        Ok(created)
    }

    /// Writes the whole entity, inserting it if it does not exist yet.
    pub async fn save(&self, entity: &T) -> Result<T> {
        let scope = self.scope()?;
        let row = self.store.upsert(scope, T::table_name(), entity.to_row()?).await?;
        T::from_row(&row)
    }

    /// Sends what changed in `entity` relative to its baseline.
    ///
    /// The baseline is the snapshot captured when the entity was first read in
    /// the bound transaction; without one, `T::default()` is used and every
    /// non-default field is sent. On success `entity` is refreshed from the
    /// stored row.
    pub async fn update_by_id(&self, id: impl Into<EntityId>, entity: &mut T) -> Result<()> {
        let id = id.into();
        let baseline = self.baseline_for(&id);
        let changes = entity.diff(&baseline);
        self.apply_changes(&id, entity, changes).await
    }

    /// Applies `mutate` to `entity` and sends only what it changed.
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
        let original = entity.clone();
        mutate(entity);
        let changes = entity.diff(&original);
        self.apply_changes(&id, entity, changes).await
    }

    /// Like [`Repository::update_by_id_in_place`], addressing the row by the entity's own identity.
    pub async fn update_in_place<F>(&self, entity: &mut T, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut T),
    {
        let id = entity.identity().ok_or_else(|| {
            DbError::UnsupportedEntity(
                T::entity_name().to_string(),
                "entity has no identity to address the update".to_string(),
            )
        })?;
        self.update_by_id_in_place(id, entity, mutate).await
    }

    /// Updates from a flat map. Bare keys assign whole columns; dotted keys
    /// (`"status.mode"`) set leaves inside a document column.
    pub async fn update_by_id_with_map(
        &self,
        id: impl Into<EntityId>,
        values: BTreeMap<String, Value>,
    ) -> Result<T> {
        let id = id.into();
        if values.is_empty() {
            return Err(DbError::InvalidChangeSet("no values to update".to_string()));
        }
        let changes = ChangeSet::from_flat(values)?;
        let mut entity = T::default();
        self.apply_changes(&id, &mut entity, changes).await?;
        Ok(entity)
    }

    /// Returns whether a row was removed.
    pub async fn delete_by_id(&self, id: impl Into<EntityId>) -> Result<bool> {
        let id = id.into();
        let scope = self.scope()?;
        self.store.delete(scope, T::table_name(), &id).await
    }

    async fn apply_changes(&self, id: &EntityId, entity: &mut T, changes: ChangeSet) -> Result<()> {
        if changes.is_empty() {
            debug!("No changes for {} {}, skipping update", T::entity_name(), id);
            return Ok(());
        }

        let span = info_span!(
            "repository.update",
            entity = T::entity_name(),
            table = T::table_name(),
            id = %id,
            fields = changes.len()
        );

        async {
            let scope = self.scope()?;
            let patches = self
                .compiler
                .compile(T::table_name(), T::columns(), &changes)
                .await?;
            if patches.is_empty() {
                debug!("Every change was dropped during compilation, skipping update");
                return Ok(());
            }

            let row = self.store.update(scope, T::table_name(), id, &patches).await?;
            *entity = T::from_row(&row)?;
            debug!(columns = patches.len(), "update applied");
            Ok(())
        }
        .instrument(span)
        .await
    }

    fn scope(&self) -> Result<Scope> {
        match &self.tx {
            Some(tx) => {
                tx.ensure_active()?;
                Ok(tx.scope())
            }
            None => Ok(Scope::Auto),
        }
    }

    fn capture(&self, entity: &T) {
        let (Some(tx), Some(id)) = (&self.tx, entity.identity()) else {
            return;
        };
        if tx.baseline().put_if_absent(EntityKey::new(T::entity_name(), id), entity.clone()) {
            debug!("Captured baseline for {} in {}", T::entity_name(), tx.id());
        }
    }

    fn baseline_for(&self, id: &EntityId) -> T {
        self.tx
            .as_ref()
            .and_then(|tx| {
                tx.baseline()
                    .get_or_nil::<T>(&EntityKey::new(T::entity_name(), id.clone()))
            })
            .unwrap_or_default()
    }
}
