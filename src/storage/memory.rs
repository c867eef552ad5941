use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{Catalog, RowWrite, Scope, Store, Table, TableSchema};
use crate::core::{DataType, DbError, EntityId, Result, Row};
use crate::patch::{ColumnPatch, PatchDialect, PostgresDialect, SchemaSource, SqlFragment, apply_patches};
use crate::transaction::TxId;

/// Writes made by one open transaction, replayed over its parent's view.
struct TxOverlay {
    parent: Option<TxId>,
    writes: Vec<(String, RowWrite)>,
}

#[derive(Default)]
struct Faults {
    next_update: Option<String>,
    next_commit: Option<String>,
    schema_lookups: bool,
}

/// In-memory [`Store`] with nested transactions.
///
/// Committed rows live in per-table locks. An open transaction only records
/// its writes; reads inside it see the committed rows with every overlay of
/// its ancestor chain applied. Committing a nested transaction folds its
/// writes into the parent; committing a top-level one applies them.
///
/// Each update is also rendered through [`PostgresDialect`] and kept in a
/// statement log, and a few fault hooks let callers simulate store failures.
pub struct MemoryStore {
    catalog: StdRwLock<Catalog>,
    tables: RwLock<HashMap<String, Arc<RwLock<Table>>>>,
    transactions: Mutex<HashMap<TxId, TxOverlay>>,
    dialect: PostgresDialect,
    statements: StdMutex<Vec<SqlFragment>>,
    faults: StdMutex<Faults>,
    update_calls: AtomicUsize,
    schema_lookups: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            catalog: StdRwLock::new(Catalog::new()),
            tables: RwLock::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            dialect: PostgresDialect,
            statements: StdMutex::new(Vec::new()),
            faults: StdMutex::new(Faults::default()),
            update_calls: AtomicUsize::new(0),
            schema_lookups: AtomicUsize::new(0),
        }
    }

    pub async fn create_table(&self, schema: TableSchema) -> Result<()> {
        let name = schema.name().to_string();
        {
            let mut catalog = self.catalog.write()?;
            *catalog = catalog.clone().with_table(schema.clone())?;
        }
        self.tables
            .write()
            .await
            .insert(name, Arc::new(RwLock::new(Table::new(schema))));
        Ok(())
    }

    pub fn catalog(&self) -> Result<Catalog> {
        Ok(self.catalog.read()?.clone())
    }

    /// Committed rows of `table`.
    pub async fn committed_rows(&self, table: &str) -> Result<Vec<Row>> {
        let handle = self.table_handle(table).await?;
        let rows = handle.read().await.rows().to_vec();
        Ok(rows)
    }

    pub async fn open_transactions(&self) -> usize {
        self.transactions.lock().await.len()
    }

    /// Statements rendered for every update so far, oldest first. Clears the log.
    pub fn take_statements(&self) -> Vec<SqlFragment> {
        std::mem::take(&mut *self.statements.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn schema_lookups(&self) -> usize {
        self.schema_lookups.load(Ordering::SeqCst)
    }

    /// Makes the next `update` fail with `reason`.
    pub fn fail_next_update(&self, reason: impl Into<String>) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).next_update = Some(reason.into());
    }

    /// Makes the next `commit` fail with `reason`; the transaction stays open.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).next_commit = Some(reason.into());
    }

    /// Makes column type lookups fail until switched off.
    pub fn fail_schema_lookups(&self, failing: bool) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).schema_lookups = failing;
    }

    fn take_fault(&self, pick: impl FnOnce(&mut Faults) -> Option<String>) -> Result<()> {
        let mut faults = self.faults.lock()?;
        match pick(&mut faults) {
            Some(reason) => Err(DbError::Store(reason)),
            None => Ok(()),
        }
    }

    async fn table_handle(&self, table: &str) -> Result<Arc<RwLock<Table>>> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .ok_or_else(|| DbError::Store(format!("table '{}' does not exist", table)))
    }

    /// Overlays from the outermost ancestor down to `id`.
    fn chain(txs: &HashMap<TxId, TxOverlay>, id: TxId) -> Result<Vec<&TxOverlay>> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(tx_id) = current {
            let overlay = txs
                .get(&tx_id)
                .ok_or_else(|| DbError::TransactionState(tx_id.to_string(), "not active".into()))?;
            chain.push(overlay);
            current = overlay.parent;
        }
        chain.reverse();
        Ok(chain)
    }

    async fn overlay_view(
        &self,
        txs: &HashMap<TxId, TxOverlay>,
        id: TxId,
        table: &str,
    ) -> Result<Table> {
        let chain = Self::chain(txs, id)?;
        let handle = self.table_handle(table).await?;
        let mut view = handle.read().await.clone();
        for overlay in chain {
            for (target, write) in &overlay.writes {
                if target == table {
                    view.apply(write);
                }
            }
        }
        Ok(view)
    }

    async fn view(&self, scope: Scope, table: &str) -> Result<Table> {
        match scope {
            Scope::Auto => {
                let handle = self.table_handle(table).await?;
                let view = handle.read().await.clone();
                Ok(view)
            }
            Scope::Tx(id) => {
                let txs = self.transactions.lock().await;
                self.overlay_view(&txs, id, table).await
            }
        }
    }

    /// Runs `plan` against the current view and records the write it returns.
    async fn write<F>(&self, scope: Scope, table: &str, plan: F) -> Result<Option<Row>>
    where
        F: FnOnce(&Table) -> Result<Option<(RowWrite, Option<Row>)>> + Send,
    {
        match scope {
            Scope::Auto => {
                let handle = self.table_handle(table).await?;
                let mut guard = handle.write().await;
                match plan(&guard)? {
                    Some((write, row)) => {
                        guard.apply(&write);
                        Ok(row)
                    }
                    None => Ok(None),
                }
            }
            Scope::Tx(id) => {
                let mut txs = self.transactions.lock().await;
                let view = self.overlay_view(&txs, id, table).await?;
                match plan(&view)? {
                    Some((write, row)) => {
                        let overlay = txs.get_mut(&id).ok_or_else(|| {
                            DbError::TransactionState(id.to_string(), "not active".into())
                        })?;
                        overlay.writes.push((table.to_string(), write));
                        Ok(row)
                    }
                    None => Ok(None),
                }
            }
        }
    }
}

fn key_column(table: &Table) -> Result<String> {
    table
        .schema()
        .key_column()
        .map(str::to_string)
        .ok_or_else(|| DbError::Store(format!("table '{}' has no key column", table.schema().name())))
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, parent: Option<TxId>) -> Result<TxId> {
        let mut txs = self.transactions.lock().await;
        if let Some(parent) = parent {
            if !txs.contains_key(&parent) {
                return Err(DbError::TransactionState(parent.to_string(), "not active".into()));
            }
        }
        let id = TxId::new();
        txs.insert(
            id,
            TxOverlay {
                parent,
                writes: Vec::new(),
            },
        );
        debug!("Began {} (parent: {:?})", id, parent);
        Ok(id)
    }

    async fn commit(&self, tx: TxId) -> Result<()> {
        let mut txs = self.transactions.lock().await;
        let parent = txs
            .get(&tx)
            .ok_or_else(|| DbError::TransactionState(tx.to_string(), "not active".into()))?
            .parent;
        if let Some(parent) = parent {
            if !txs.contains_key(&parent) {
                return Err(DbError::TransactionState(parent.to_string(), "not active".into()));
            }
        }
        let open_children = txs
            .values()
            .filter(|overlay| overlay.parent == Some(tx))
            .count();
        if open_children > 0 {
            return Err(DbError::TransactionState(
                tx.to_string(),
                format!("{} nested transaction(s) still open", open_children),
            ));
        }
        self.take_fault(|faults| faults.next_commit.take())?;

        let overlay = txs
            .remove(&tx)
            .ok_or_else(|| DbError::TransactionState(tx.to_string(), "not active".into()))?;

        match overlay.parent {
            Some(parent) => {
                let parent_overlay = txs.get_mut(&parent).ok_or_else(|| {
                    DbError::TransactionState(parent.to_string(), "not active".into())
                })?;
                parent_overlay.writes.extend(overlay.writes);
            }
            None => {
                for (table, write) in &overlay.writes {
                    let handle = self.table_handle(table).await?;
                    handle.write().await.apply(write);
                }
            }
        }
        debug!("Committed {}", tx);
        Ok(())
    }

    async fn rollback(&self, tx: TxId) -> Result<()> {
        let mut txs = self.transactions.lock().await;
        if txs.remove(&tx).is_none() {
            return Err(DbError::TransactionState(tx.to_string(), "not active".into()));
        }

        // Nested transactions cannot outlive their parent.
        loop {
            let orphans: Vec<TxId> = txs
                .iter()
                .filter(|(_, overlay)| {
                    overlay
                        .parent
                        .map(|parent| !txs.contains_key(&parent))
                        .unwrap_or(false)
                })
                .map(|(id, _)| *id)
                .collect();
            if orphans.is_empty() {
                break;
            }
            for id in orphans {
                txs.remove(&id);
            }
        }
        debug!("Rolled back {}", tx);
        Ok(())
    }

    async fn fetch(&self, scope: Scope, table: &str, id: &EntityId) -> Result<Option<Row>> {
        let view = self.view(scope, table).await?;
        Ok(view.get(id.value()).cloned())
    }

    async fn fetch_all(&self, scope: Scope, table: &str) -> Result<Vec<Row>> {
        Ok(self.view(scope, table).await?.into_rows())
    }

    async fn insert(&self, scope: Scope, table: &str, row: Row) -> Result<Row> {
        let stored = self
            .write(scope, table, move |view| {
                view.schema().validate_row(&row)?;
                let key = view.schema().key_of(&row);
                if let Some(key) = &key {
                    if view.get(key).is_some() {
                        return Err(DbError::Store(format!(
                            "duplicate key {} in '{}'",
                            key,
                            view.schema().name()
                        )));
                    }
                }
                Ok(Some((
                    RowWrite::Put {
                        key,
                        row: row.clone(),
                    },
                    Some(row),
                )))
            })
            .await?;
        stored.ok_or_else(|| DbError::Store("insert produced no row".into()))
    }

    async fn upsert(&self, scope: Scope, table: &str, row: Row) -> Result<Row> {
        let stored = self
            .write(scope, table, move |view| {
                view.schema().validate_row(&row)?;
                let key = view.schema().key_of(&row);
                Ok(Some((
                    RowWrite::Put {
                        key,
                        row: row.clone(),
                    },
                    Some(row),
                )))
            })
            .await?;
        stored.ok_or_else(|| DbError::Store("upsert produced no row".into()))
    }

    async fn update(
        &self,
        scope: Scope,
        table: &str,
        id: &EntityId,
        patches: &[ColumnPatch],
    ) -> Result<Row> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.take_fault(|faults| faults.next_update.take())?;

        let key = id.value().clone();
        let table_name = table.to_string();
        let entity_id = id.to_string();
        let patches = patches.to_vec();

        let (statement, stored) = {
            let statement_slot = StdMutex::new(None);
            let stored = self
                .write(scope, table, |view| {
                    let key_column = key_column(view)?;
                    *statement_slot.lock()? = Some(self.dialect.render_update(
                        &table_name,
                        &key_column,
                        &key,
                        &patches,
                    ));

                    let mut row = view
                        .get(&key)
                        .cloned()
                        .ok_or_else(|| DbError::NotFound(table_name.clone(), entity_id.clone()))?;
                    apply_patches(&mut row, &patches)?;
                    view.schema().validate_row(&row)?;
                    Ok(Some((
                        RowWrite::Put {
                            key: Some(key.clone()),
                            row: row.clone(),
                        },
                        Some(row),
                    )))
                })
                .await?;
            let statement = statement_slot.into_inner()?;
            (statement, stored)
        };

        if let Some(statement) = statement {
            debug!("{} {:?}", statement.sql, statement.args);
            self.statements.lock()?.push(statement);
        }
        stored.ok_or_else(|| DbError::NotFound(table.to_string(), id.to_string()))
    }

    async fn delete(&self, scope: Scope, table: &str, id: &EntityId) -> Result<bool> {
        let key = id.value().clone();
        let removed = self
            .write(scope, table, move |view| {
                if view.get(&key).is_none() {
                    return Ok(None);
                }
                let row = view.get(&key).cloned();
                Ok(Some((RowWrite::Delete { key }, row)))
            })
            .await?;
        Ok(removed.is_some())
    }
}

#[async_trait]
impl SchemaSource for MemoryStore {
    async fn column_type(&self, table: &str, column: &str) -> Result<Option<DataType>> {
        self.schema_lookups.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock()?.schema_lookups {
            return Err(DbError::SchemaLookup {
                table: table.to_string(),
                column: column.to_string(),
                reason: "catalog unavailable".to_string(),
            });
        }
        Ok(self.catalog.read()?.column_type(table, column))
    }
}
