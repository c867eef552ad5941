//! Change representation produced by diffing two entity snapshots.
//!
//! Changes stay typed all the way to the patch compiler; the dotted-key view
//! (`"status.mode"`) is only rendered by [`ChangeSet::flatten`] and parsed back
//! by [`ChangeSet::from_flat`].

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::core::{DbError, Result, Value};

/// Address of a leaf inside a document, one segment per nesting level.
///
/// Ordered segment by segment, so patch steps come out in lexicographic path
/// order and a key containing a dot stays distinct from a nested path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DocumentPath(Vec<String>);

impl DocumentPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Splits a dotted path. Empty input yields the root path.
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self(dotted.split('.').map(str::to_string).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Re-roots this path under `prefix`.
    pub fn under(&self, prefix: &DocumentPath) -> Self {
        let mut segments = prefix.0.clone();
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    pub fn dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dotted())
    }
}

/// A new value for one path, serialized eagerly.
///
/// Serialization failures are carried instead of raised; the patch compiler
/// decides whether to skip the path or abort.
#[derive(Debug, Clone, PartialEq)]
pub enum PathValue {
    Ready(JsonValue),
    Unserializable(String),
}

impl PathValue {
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => Self::Ready(json),
            Err(err) => Self::Unserializable(err.to_string()),
        }
    }

    pub fn null() -> Self {
        Self::Ready(JsonValue::Null)
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Ready(json) => Some(json),
            Self::Unserializable(_) => None,
        }
    }

    pub fn to_result(&self) -> Result<&JsonValue> {
        match self {
            Self::Ready(json) => Ok(json),
            Self::Unserializable(reason) => Err(DbError::Serialization(reason.clone())),
        }
    }
}

impl From<JsonValue> for PathValue {
    fn from(json: JsonValue) -> Self {
        Self::Ready(json)
    }
}

/// Leaf-level changes inside one document, keyed by path relative to the document root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentDiff {
    entries: BTreeMap<DocumentPath, PathValue>,
}

impl DocumentDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, path: DocumentPath, value: PathValue) {
        self.entries.insert(path, value);
    }

    /// Records a changed leaf field of the current document level.
    pub fn set_leaf<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        self.entries
            .insert(DocumentPath::root().child(key), PathValue::of(value));
    }

    /// Folds the change of a nested optional record under `key`.
    pub fn nest(&mut self, key: &str, change: FieldChange) {
        let prefix = DocumentPath::root().child(key);
        match change {
            FieldChange::NoChange => {}
            FieldChange::SetWhole(value) | FieldChange::Replace(value) => {
                self.entries.insert(prefix, value);
            }
            FieldChange::SetNull => {
                self.entries.insert(prefix, PathValue::null());
            }
            FieldChange::SubPaths(inner) => self.nest_diff(key, inner),
        }
    }

    /// Folds the diff of a nested, always-present record under `key`.
    pub fn nest_diff(&mut self, key: &str, inner: DocumentDiff) {
        let prefix = DocumentPath::root().child(key);
        for (path, value) in inner.entries {
            self.entries.insert(path.under(&prefix), value);
        }
    }

    pub fn get(&self, path: &DocumentPath) -> Option<&PathValue> {
        self.entries.get(path)
    }

    pub fn contains_root(&self) -> bool {
        self.entries.contains_key(&DocumentPath::root())
    }

    pub fn iter(&self) -> btree_map::Iter<'_, DocumentPath, PathValue> {
        self.entries.iter()
    }
}

impl IntoIterator for DocumentDiff {
    type Item = (DocumentPath, PathValue);
    type IntoIter = btree_map::IntoIter<DocumentPath, PathValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(DocumentPath, PathValue)> for DocumentDiff {
    fn from_iter<I: IntoIterator<Item = (DocumentPath, PathValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Outcome of diffing one semi-structured field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    NoChange,
    /// Nothing was stored before; the whole new value goes in.
    SetWhole(PathValue),
    /// A stored document changed shape at its root and is overwritten.
    Replace(PathValue),
    /// The field was cleared.
    SetNull,
    SubPaths(DocumentDiff),
}

impl FieldChange {
    /// Applies the nil rules between the new and the old value of a document field.
    pub fn between<T>(new: &Option<T>, old: &Option<T>) -> Self
    where
        T: super::Document + Serialize,
    {
        match (new, old) {
            (None, None) => Self::NoChange,
            (Some(new), None) => Self::SetWhole(PathValue::of(new)),
            (None, Some(_)) => Self::SetNull,
            (Some(new), Some(old)) => {
                let diff = new.diff_document(old);
                if diff.is_empty() {
                    Self::NoChange
                } else if diff.contains_root() {
                    // The document itself changed shape; there is no sub-path to address.
                    Self::Replace(PathValue::of(new))
                } else {
                    Self::SubPaths(diff)
                }
            }
        }
    }
}

/// One entry of a change-set.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// New value for a plain column.
    Scalar(Value),
    /// Whole-document write for a column that held nothing before.
    ReplaceDocument(PathValue),
    /// Whole-document write over a stored document of another shape.
    OverwriteDocument(PathValue),
    /// Explicit null for a document column.
    ClearDocument,
    /// Leaf updates inside a document column.
    PathSet(DocumentDiff),
}

/// Field name to change, ordered by field name.
///
/// A field carries at most one [`Change`], so a column can never be addressed
/// both as a whole value and through sub-paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    entries: BTreeMap<String, Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn insert_scalar(&mut self, field: &str, value: Value) {
        self.entries.insert(field.to_string(), Change::Scalar(value));
    }

    /// Records the outcome of a document field diff; `NoChange` records nothing.
    pub fn record_document(&mut self, field: &str, change: FieldChange) {
        let entry = match change {
            FieldChange::NoChange => return,
            FieldChange::SetWhole(value) => Change::ReplaceDocument(value),
            FieldChange::Replace(value) => Change::OverwriteDocument(value),
            FieldChange::SetNull => Change::ClearDocument,
            FieldChange::SubPaths(diff) => Change::PathSet(diff),
        };
        self.entries.insert(field.to_string(), entry);
    }

    pub fn get(&self, field: &str) -> Option<&Change> {
        self.entries.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.entries.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Change> {
        self.entries.remove(field)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Change> {
        self.entries.iter()
    }

    /// Dotted keys in the order [`ChangeSet::flatten`] would render them.
    pub fn dotted_keys(&self) -> Vec<String> {
        self.flatten().into_keys().collect()
    }

    /// Renders the flat dotted-key view.
    ///
    /// Plain and whole-document changes keep the bare field name; path changes
    /// become `"<field>.<path>"`. Unserializable values are left out.
    pub fn flatten(&self) -> BTreeMap<String, JsonValue> {
        let mut flat = BTreeMap::new();
        for (field, change) in &self.entries {
            match change {
                Change::Scalar(value) => {
                    flat.insert(field.clone(), value.to_json());
                }
                Change::ReplaceDocument(value) | Change::OverwriteDocument(value) => {
                    if let Some(json) = value.as_json() {
                        flat.insert(field.clone(), json.clone());
                    }
                }
                Change::ClearDocument => {
                    flat.insert(field.clone(), JsonValue::Null);
                }
                Change::PathSet(diff) => {
                    for (path, value) in diff.iter() {
                        if let Some(json) = value.as_json() {
                            flat.insert(format!("{}.{}", field, path.dotted()), json.clone());
                        }
                    }
                }
            }
        }
        flat
    }

    /// Parses a flat dotted-key map into a change-set.
    ///
    /// Keys without a dot become plain assignments; dotted keys are grouped
    /// under the segment before the first dot. Mixing a bare key and dotted
    /// keys for the same root is rejected.
    pub fn from_flat<I, K>(values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut plain = BTreeMap::<String, Value>::new();
        let mut grouped = BTreeMap::<String, DocumentDiff>::new();

        for (key, value) in values {
            let key = key.as_ref();
            match key.split_once('.') {
                Some((root, sub_path)) => {
                    if root.is_empty() || sub_path.is_empty() {
                        return Err(DbError::InvalidChangeSet(format!(
                            "malformed path '{}'",
                            key
                        )));
                    }
                    grouped
                        .entry(root.to_string())
                        .or_default()
                        .insert(DocumentPath::parse(sub_path), PathValue::Ready(value.to_json()));
                }
                None => {
                    plain.insert(key.to_string(), value);
                }
            }
        }

        if let Some(root) = grouped.keys().find(|root| plain.contains_key(*root)) {
            return Err(DbError::InvalidChangeSet(format!(
                "'{}' is addressed both as a whole value and through sub-paths",
                root
            )));
        }

        let mut changes = Self::new();
        for (field, value) in plain {
            changes.entries.insert(field, Change::Scalar(value));
        }
        for (field, diff) in grouped {
            changes.entries.insert(field, Change::PathSet(diff));
        }
        Ok(changes)
    }
}

impl IntoIterator for ChangeSet {
    type Item = (String, Change);
    type IntoIter = btree_map::IntoIter<String, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ChangeSet {
    type Item = (&'a String, &'a Change);
    type IntoIter = btree_map::Iter<'a, String, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
