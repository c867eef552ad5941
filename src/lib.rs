// ============================================================================
// DocDelta Library
// ============================================================================
//
// Change tracking for entities with semi-structured (JSON) columns: field
// diffs that descend into documents, compilation into leaf-level column
// patches, and transactions that remember what each entity looked like when
// first read.

// Derived impls refer to `::docdelta::...`, which must also resolve inside this crate.
extern crate self as docdelta;

pub mod cache;
pub mod core;
pub mod diff;
pub mod patch;
pub mod prelude;
pub mod repository;
pub mod storage;
pub mod transaction;

pub use core::{DataType, DbError, DocumentSubtype, EntityId, Result, Row, Value};
pub use diff::{ChangeSet, Diffable, Document, Entity};
pub use docdelta_derive::{Diffable, Document};
pub use repository::{Repository, RepositoryConfig};
pub use transaction::Tx;
