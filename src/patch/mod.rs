//! Turns a [`ChangeSet`](crate::diff::ChangeSet) into per-column update
//! operations and renders or evaluates them.

pub mod apply;
pub mod compiler;
pub mod dialect;
pub mod resolver;

pub use apply::{apply_op, apply_patches};
pub use compiler::PatchCompiler;
pub use dialect::{PatchDialect, PostgresDialect, SqlFragment, path_literal};
pub use resolver::{ColumnTypeResolver, SchemaSource};

use serde_json::Value as JsonValue;

use crate::core::{DocumentSubtype, Value};
use crate::diff::DocumentPath;

/// One column's update.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPatch {
    pub column: String,
    pub op: PatchOp,
}

impl ColumnPatch {
    pub fn new(column: impl Into<String>, op: PatchOp) -> Self {
        Self {
            column: column.into(),
            op,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchOp {
    /// Overwrite the column.
    Assign(Value),
    /// Set the column to NULL.
    Clear,
    /// `COALESCE(column, '{}') || document`: top-level keys of `document` win.
    Merge {
        subtype: DocumentSubtype,
        document: JsonValue,
    },
    /// `COALESCE(column, '{}')` with every step applied in order.
    SetPaths {
        subtype: DocumentSubtype,
        steps: Vec<SetPathStep>,
    },
}

impl PatchOp {
    pub fn subtype(&self) -> Option<DocumentSubtype> {
        match self {
            Self::Merge { subtype, .. } | Self::SetPaths { subtype, .. } => Some(*subtype),
            Self::Assign(_) | Self::Clear => None,
        }
    }
}

/// Set the leaf at `path` to `value`, keeping its siblings.
#[derive(Debug, Clone, PartialEq)]
pub struct SetPathStep {
    pub path: DocumentPath,
    pub value: JsonValue,
}
