use serde_json::Value as JsonValue;

use super::Document;
use super::change::{DocumentDiff, DocumentPath, PathValue};

/// Untyped documents diff key by key.
///
/// Objects recurse; a key dropped from the new value is set to JSON null.
/// Anything else that differs (arrays, scalars, type changes) is replaced
/// whole at its path.
impl Document for JsonValue {
    fn diff_document(&self, old: &Self) -> DocumentDiff {
        let mut diff = DocumentDiff::new();
        diff_into(&mut diff, &DocumentPath::root(), self, old);
        diff
    }
}

fn diff_into(diff: &mut DocumentDiff, prefix: &DocumentPath, new: &JsonValue, old: &JsonValue) {
    match (new, old) {
        (JsonValue::Object(new_fields), JsonValue::Object(old_fields)) => {
            for (key, new_value) in new_fields {
                let path = prefix.child(key.as_str());
                match old_fields.get(key) {
                    Some(old_value) if old_value == new_value => {}
                    Some(old_value) if new_value.is_object() && old_value.is_object() => {
                        diff_into(diff, &path, new_value, old_value);
                    }
                    _ => diff.insert(path, PathValue::Ready(new_value.clone())),
                }
            }
            for key in old_fields.keys() {
                if !new_fields.contains_key(key) {
                    diff.insert(prefix.child(key.as_str()), PathValue::null());
                }
            }
        }
        _ if new != old => diff.insert(prefix.clone(), PathValue::Ready(new.clone())),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FieldChange;
    use serde_json::json;

    fn dotted(diff: &DocumentDiff) -> Vec<(String, JsonValue)> {
        diff.iter()
            .map(|(path, value)| (path.dotted(), value.as_json().cloned().unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_object_diff_reaches_leaves() {
        let old = json!({"mode": "QR", "state": {"code": 1, "label": "x"}, "gone": true});
        let new = json!({"mode": "QR", "state": {"code": 2, "label": "x"}, "added": [1]});

        let diff = new.diff_document(&old);
        assert_eq!(
            dotted(&diff),
            vec![
                ("added".to_string(), json!([1])),
                ("gone".to_string(), JsonValue::Null),
                ("state.code".to_string(), json!(2)),
            ]
        );
    }

    #[test]
    fn test_equal_documents_yield_nothing() {
        let doc = json!({"a": {"b": [1, 2]}});
        assert!(doc.diff_document(&doc.clone()).is_empty());
    }

    #[test]
    fn test_root_shape_change_becomes_whole_replacement() {
        let change = FieldChange::between(&Some(json!([1, 2])), &Some(json!({"a": 1})));
        assert_eq!(change, FieldChange::Replace(PathValue::Ready(json!([1, 2]))));
    }
}
