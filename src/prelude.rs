//! Common imports for application code.
//!
//! ```ignore
//! use docdelta::prelude::*;
//! ```

pub use crate::cache::{CacheConfig, CachedRepository, LruResourceCache, ResourceCache};
pub use crate::core::{
    Column, DataType, DbError, DocumentSubtype, EntityId, Result, Row, Value,
};
pub use crate::diff::{ChangeSet, Diffable, Document, Entity};
pub use crate::patch::{ColumnTypeResolver, PatchDialect, PostgresDialect, SchemaSource};
pub use crate::repository::{Page, Repository, RepositoryConfig};
pub use crate::storage::{MemoryStore, Store, TableSchema};
pub use crate::transaction::{TransactionState, Tx};
pub use docdelta_derive::{Diffable, Document};
