use std::collections::BTreeMap;

use serde_json::Value as JsonValue;
use tracing::warn;

use super::resolver::ColumnTypeResolver;
use super::{ColumnPatch, PatchOp, SetPathStep};
use crate::core::{ColumnDef, DbError, Result, Value, resolve_column};
use crate::diff::{Change, ChangeSet, DocumentDiff, PathValue};

/// Compiles change-sets into column patches.
///
/// Output is ordered by column name and path steps are in lexicographic path
/// order, so the same change-set always produces the same patches.
#[derive(Clone)]
pub struct PatchCompiler {
    resolver: ColumnTypeResolver,
    strict_serialization: bool,
}

impl PatchCompiler {
    pub fn new(resolver: ColumnTypeResolver) -> Self {
        Self {
            resolver,
            strict_serialization: false,
        }
    }

    /// When set, a value that cannot be serialized aborts compilation instead
    /// of being skipped.
    pub fn strict_serialization(mut self, strict: bool) -> Self {
        self.strict_serialization = strict;
        self
    }

    pub fn resolver(&self) -> &ColumnTypeResolver {
        &self.resolver
    }

    pub async fn compile(
        &self,
        table: &str,
        columns: &[ColumnDef],
        changes: &ChangeSet,
    ) -> Result<Vec<ColumnPatch>> {
        let mut patches = BTreeMap::<String, PatchOp>::new();

        for (field, change) in changes {
            let column = resolve_column(columns, field).to_string();
            if patches.contains_key(&column) {
                return Err(DbError::InvalidChangeSet(format!(
                    "column '{}' is targeted by more than one field",
                    column
                )));
            }

            let op = match change {
                Change::Scalar(value) => Some(PatchOp::Assign(value.clone())),
                Change::ClearDocument => Some(PatchOp::Clear),
                Change::ReplaceDocument(value) => {
                    self.compile_replace(table, &column, value).await?
                }
                Change::OverwriteDocument(value) => self
                    .serialized(table, &column, None, value)?
                    .map(|document| match document {
                        JsonValue::Null => PatchOp::Clear,
                        other => PatchOp::Assign(Value::Json(other)),
                    }),
                Change::PathSet(diff) => self.compile_paths(table, &column, diff).await?,
            };

            if let Some(op) = op {
                patches.insert(column, op);
            }
        }

        Ok(patches
            .into_iter()
            .map(|(column, op)| ColumnPatch { column, op })
            .collect())
    }

    async fn compile_replace(
        &self,
        table: &str,
        column: &str,
        value: &PathValue,
    ) -> Result<Option<PatchOp>> {
        let Some(document) = self.serialized(table, column, None, value)? else {
            return Ok(None);
        };

        let op = match document {
            JsonValue::Null => PatchOp::Clear,
            JsonValue::Object(_) => PatchOp::Merge {
                subtype: self.resolver.resolve(table, column).await,
                document,
            },
            // Concatenation is only a merge for objects; other shapes overwrite.
            other => PatchOp::Assign(Value::Json(other)),
        };
        Ok(Some(op))
    }

    async fn compile_paths(
        &self,
        table: &str,
        column: &str,
        diff: &DocumentDiff,
    ) -> Result<Option<PatchOp>> {
        let mut steps = Vec::with_capacity(diff.len());
        for (path, value) in diff.iter() {
            if path.is_root() {
                return Err(DbError::InvalidChangeSet(format!(
                    "empty document path for column '{}'",
                    column
                )));
            }
            if let Some(json) = self.serialized(table, column, Some(&path.dotted()), value)? {
                steps.push(SetPathStep {
                    path: path.clone(),
                    value: json,
                });
            }
        }

        if steps.is_empty() {
            return Ok(None);
        }

        Ok(Some(PatchOp::SetPaths {
            subtype: self.resolver.resolve(table, column).await,
            steps,
        }))
    }

    fn serialized(
        &self,
        table: &str,
        column: &str,
        path: Option<&str>,
        value: &PathValue,
    ) -> Result<Option<JsonValue>> {
        match value {
            PathValue::Ready(json) => Ok(Some(json.clone())),
            PathValue::Unserializable(reason) => {
                if self.strict_serialization {
                    let target = match path {
                        Some(path) => format!("{}.{}.{}", table, column, path),
                        None => format!("{}.{}", table, column),
                    };
                    return Err(DbError::Serialization(format!("{}: {}", target, reason)));
                }
                warn!(
                    table = %table,
                    column = %column,
                    path = path.unwrap_or(""),
                    error = %reason,
                    "skipping value that could not be serialized"
                );
                Ok(None)
            }
        }
    }
}
