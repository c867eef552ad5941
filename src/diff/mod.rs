//! Field-level change detection between two snapshots of an entity.
//!
//! Entities implement [`Diffable`] (normally through `#[derive(Diffable)]`),
//! nested records implement [`Document`] (through `#[derive(Document)]`, or the
//! built-in impl for `serde_json::Value`).

pub mod change;
mod json;

pub use change::{Change, ChangeSet, DocumentDiff, DocumentPath, FieldChange, PathValue};

use crate::core::{ColumnDef, EntityId, Result, Row};

/// A semi-structured record that can report its own leaf-level changes.
pub trait Document {
    /// Paths (relative to this record) whose value differs from `old`.
    fn diff_document(&self, old: &Self) -> DocumentDiff;
}

/// A persisted record: one row in one table.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Resource name used in logs and cache tags.
    fn entity_name() -> &'static str;

    fn table_name() -> &'static str;

    fn columns() -> &'static [ColumnDef];

    /// `None` for records that do not expose an identity.
    fn identity(&self) -> Option<EntityId>;

    fn to_row(&self) -> Result<Row>;

    fn from_row(row: &Row) -> Result<Self>;
}

/// An entity whose snapshots can be compared field by field.
pub trait Diffable: Entity {
    /// Changes that turn `old` into `self`.
    ///
    /// Plain fields are compared by value. Document fields follow the nil
    /// rules of [`FieldChange::between`] and otherwise descend to leaves.
    fn diff(&self, old: &Self) -> ChangeSet;
}

/// Diffs `new` against `old`.
pub fn diff<T: Diffable>(new: &T, old: &T) -> ChangeSet {
    new.diff(old)
}
