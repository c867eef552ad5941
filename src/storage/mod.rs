//! Record store abstraction and its in-memory implementation.

pub mod catalog;
pub mod memory;
pub mod table;

pub use catalog::Catalog;
pub use memory::MemoryStore;
pub use table::{RowWrite, Table, TableSchema};

use async_trait::async_trait;

use crate::core::{EntityId, Result, Row};
use crate::patch::ColumnPatch;
use crate::transaction::TxId;

/// Where an operation runs: auto-committed, or inside an open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Auto,
    Tx(TxId),
}

impl Scope {
    pub fn tx_id(&self) -> Option<TxId> {
        match self {
            Scope::Auto => None,
            Scope::Tx(id) => Some(*id),
        }
    }
}

/// A record store with transactions and per-column patch updates.
///
/// Rows are addressed by the table's key column. `update` applies compiled
/// column patches in the store and returns the stored row.
#[async_trait]
pub trait Store: Send + Sync {
    /// Opens a transaction, nested inside `parent` when given.
    async fn begin(&self, parent: Option<TxId>) -> Result<TxId>;

    async fn commit(&self, tx: TxId) -> Result<()>;

    async fn rollback(&self, tx: TxId) -> Result<()>;

    async fn fetch(&self, scope: Scope, table: &str, id: &EntityId) -> Result<Option<Row>>;

    async fn fetch_all(&self, scope: Scope, table: &str) -> Result<Vec<Row>>;

    /// Inserts a new row; fails if its key already exists.
    async fn insert(&self, scope: Scope, table: &str, row: Row) -> Result<Row>;

    /// Inserts or fully replaces a row.
    async fn upsert(&self, scope: Scope, table: &str, row: Row) -> Result<Row>;

    /// Applies `patches` to the row with key `id`; `NotFound` if it does not exist.
    async fn update(
        &self,
        scope: Scope,
        table: &str,
        id: &EntityId,
        patches: &[ColumnPatch],
    ) -> Result<Row>;

    /// Returns whether a row was removed.
    async fn delete(&self, scope: Scope, table: &str, id: &EntityId) -> Result<bool>;
}
