use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::{DbError, Result, Value};

/// A stored record: column name to value.
pub type Row = BTreeMap<String, Value>;

/// Identity of an entity inside its table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId(Value);

impl EntityId {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Value> for EntityId {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(Value::Integer(value))
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(Value::Text(value))
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(Value::Text(value.to_string()))
    }
}

impl From<uuid::Uuid> for EntityId {
    fn from(value: uuid::Uuid) -> Self {
        Self(Value::Uuid(value))
    }
}

/// Concrete storage subtype of a semi-structured column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DocumentSubtype {
    Json,
    /// The most permissive subtype; used whenever the real one is unknown.
    #[default]
    Jsonb,
}

impl DocumentSubtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Jsonb => "jsonb",
        }
    }
}

impl fmt::Display for DocumentSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentSubtype {
    type Err = DbError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "jsonb" => Ok(Self::Jsonb),
            other => Err(DbError::TypeMismatch(format!(
                "'{}' is not a document subtype (expected json or jsonb)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Uuid,
    Document(DocumentSubtype),
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Timestamp, Value::Timestamp(_)) => true,
            (Self::Uuid, Value::Uuid(_)) => true,
            (Self::Document(_), Value::Json(_)) => true,
            _ => false,
        }
    }

    /// Parses the type name a metadata query reports for a column.
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        let base = upper.split(['(', ' ', '\t']).next().unwrap_or_default();
        match base {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" => Some(Self::Integer),
            "FLOAT" | "DOUBLE" | "REAL" | "NUMERIC" | "DECIMAL" => Some(Self::Float),
            "TEXT" | "STRING" | "CHAR" | "VARCHAR" => Some(Self::Text),
            "BOOL" | "BOOLEAN" => Some(Self::Boolean),
            "TIMESTAMP" | "TIMESTAMPTZ" | "DATETIME" => Some(Self::Timestamp),
            "UUID" => Some(Self::Uuid),
            "JSON" => Some(Self::Document(DocumentSubtype::Json)),
            "JSONB" => Some(Self::Document(DocumentSubtype::Jsonb)),
            _ => None,
        }
    }

    pub fn document_subtype(&self) -> Option<DocumentSubtype> {
        match self {
            Self::Document(subtype) => Some(*subtype),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Uuid => write!(f, "UUID"),
            Self::Document(DocumentSubtype::Json) => write!(f, "JSON"),
            Self::Document(DocumentSubtype::Jsonb) => write!(f, "JSONB"),
        }
    }
}

/// A column declaration as the store's catalog knows it.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(DbError::Store(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// How a struct field participates in diffing and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Identity,
    Scalar,
    Document,
}

/// Static field to column mapping generated for every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub field: &'static str,
    pub column: &'static str,
    pub kind: ColumnKind,
}

impl ColumnDef {
    pub const fn new(field: &'static str, column: &'static str, kind: ColumnKind) -> Self {
        Self {
            field,
            column,
            kind,
        }
    }
}

/// Resolves a change-set root (a field name) to its storage column.
///
/// Tries the field name as written, then ignoring ASCII case, then the column
/// names themselves. Falls back to the root unchanged.
pub fn resolve_column<'a>(columns: &'a [ColumnDef], root: &'a str) -> &'a str {
    if let Some(def) = columns.iter().find(|def| def.field == root) {
        return def.column;
    }
    if let Some(def) = columns
        .iter()
        .find(|def| def.field.eq_ignore_ascii_case(root))
    {
        return def.column;
    }
    columns
        .iter()
        .find(|def| def.column == root)
        .map(|def| def.column)
        .unwrap_or(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLUMNS: &[ColumnDef] = &[
        ColumnDef::new("id", "id", ColumnKind::Identity),
        ColumnDef::new("whatsapp_data", "whatsapp_payload", ColumnKind::Document),
    ];

    #[test]
    fn test_entity_id_renders_raw_and_keys_maps() {
        let id = EntityId::from(uuid::Uuid::nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");

        let mut seen = std::collections::HashSet::new();
        seen.insert(EntityId::from(7));
        assert!(seen.contains(&EntityId::new(Value::Float(7.0))));
    }

    #[test]
    fn test_resolve_column_by_field_and_fallback() {
        assert_eq!(resolve_column(COLUMNS, "whatsapp_data"), "whatsapp_payload");
        assert_eq!(resolve_column(COLUMNS, "WhatsApp_Data"), "whatsapp_payload");
        assert_eq!(resolve_column(COLUMNS, "whatsapp_payload"), "whatsapp_payload");
        assert_eq!(resolve_column(COLUMNS, "unknown"), "unknown");
    }

    #[test]
    fn test_parse_reported_types() {
        assert_eq!(
            DataType::parse("jsonb"),
            Some(DataType::Document(DocumentSubtype::Jsonb))
        );
        assert_eq!(DataType::parse("character varying"), None);
        assert_eq!(DataType::parse("VARCHAR(32)"), Some(DataType::Text));
        assert_eq!("JSON".parse::<DocumentSubtype>().unwrap(), DocumentSubtype::Json);
        assert!("hstore".parse::<DocumentSubtype>().is_err());
    }

    #[test]
    fn test_column_validation() {
        let col = Column::new("age", DataType::Integer).not_null();
        assert!(col.validate(&Value::Integer(3)).is_ok());
        assert!(col.validate(&Value::Null).is_err());
        assert!(col.validate(&Value::Text("x".into())).is_err());
    }
}
