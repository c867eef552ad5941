//! In-process evaluation of column patches, mirroring PostgreSQL's
//! `jsonb_set` (with `create_missing`) and `||` semantics.

use serde_json::{Map, Value as JsonValue};

use super::{ColumnPatch, PatchOp};
use crate::core::{DbError, Result, Row, Value};

/// Applies every patch to `row` in order.
pub fn apply_patches(row: &mut Row, patches: &[ColumnPatch]) -> Result<()> {
    for patch in patches {
        let next = apply_op(row.get(&patch.column), &patch.op)?;
        row.insert(patch.column.clone(), next);
    }
    Ok(())
}

/// New value of a column holding `current` after `op`.
pub fn apply_op(current: Option<&Value>, op: &PatchOp) -> Result<Value> {
    match op {
        PatchOp::Assign(value) => Ok(value.clone()),
        PatchOp::Clear => Ok(Value::Null),
        PatchOp::Merge { document, .. } => {
            let base = coalesce_document(current)?;
            Ok(Value::Json(concat(base, document.clone())))
        }
        PatchOp::SetPaths { steps, .. } => {
            let mut target = coalesce_document(current)?;
            for step in steps {
                set_path(&mut target, step.path.segments(), &step.value)?;
            }
            Ok(Value::Json(target))
        }
    }
}

fn coalesce_document(current: Option<&Value>) -> Result<JsonValue> {
    match current {
        None => Ok(JsonValue::Object(Map::new())),
        Some(value) if value.is_null() => Ok(JsonValue::Object(Map::new())),
        Some(Value::Json(json)) => Ok(json.clone()),
        Some(Value::Text(raw)) => serde_json::from_str(raw).map_err(Into::into),
        Some(other) => Err(DbError::TypeMismatch(format!(
            "cannot apply a document patch to a {} value",
            other.type_name()
        ))),
    }
}

fn concat(left: JsonValue, right: JsonValue) -> JsonValue {
    match (left, right) {
        (JsonValue::Object(mut base), JsonValue::Object(overlay)) => {
            base.extend(overlay);
            JsonValue::Object(base)
        }
        (JsonValue::Array(mut base), JsonValue::Array(tail)) => {
            base.extend(tail);
            JsonValue::Array(base)
        }
        (JsonValue::Array(mut base), other) => {
            base.push(other);
            JsonValue::Array(base)
        }
        (other, JsonValue::Array(tail)) => {
            let mut items = Vec::with_capacity(tail.len() + 1);
            items.push(other);
            items.extend(tail);
            JsonValue::Array(items)
        }
        (left, right) => JsonValue::Array(vec![left, right]),
    }
}

fn set_path(target: &mut JsonValue, path: &[String], value: &JsonValue) -> Result<()> {
    if !target.is_object() && !target.is_array() {
        return Err(DbError::TypeMismatch("cannot set path in scalar".to_string()));
    }
    set_in(target, path, 0, value)
}

fn set_in(node: &mut JsonValue, path: &[String], level: usize, value: &JsonValue) -> Result<()> {
    let Some(segment) = path.get(level) else {
        return Ok(());
    };
    let last = level + 1 == path.len();

    match node {
        JsonValue::Object(fields) => {
            if last {
                fields.insert(segment.clone(), value.clone());
                return Ok(());
            }
            // A missing intermediate key leaves the document untouched.
            match fields.get_mut(segment) {
                Some(child) => set_in(child, path, level + 1, value),
                None => Ok(()),
            }
        }
        JsonValue::Array(items) => {
            let index: i64 = segment.parse().map_err(|_| {
                DbError::TypeMismatch(format!(
                    "path element at position {} is not an integer: \"{}\"",
                    level + 1,
                    segment
                ))
            })?;
            let len = items.len() as i64;
            let resolved = if index < 0 { len + index } else { index };

            if (0..len).contains(&resolved) {
                let slot = &mut items[resolved as usize];
                if last {
                    *slot = value.clone();
                    return Ok(());
                }
                return set_in(slot, path, level + 1, value);
            }

            if last {
                if resolved < 0 {
                    items.insert(0, value.clone());
                } else {
                    items.push(value.clone());
                }
            }
            Ok(())
        }
        // Scalars below the root cannot be descended into.
        _ => Ok(()),
    }
}
