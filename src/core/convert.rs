use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{DbError, Result, Value};

/// Conversion between a struct field and a scalar column value.
///
/// Implemented for the primitive types, identities, timestamps and raw JSON.
/// Derived entities call these for every non-document field.
pub trait ColumnValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self>;
}

fn mismatch(expected: &str, got: &Value) -> DbError {
    DbError::TypeMismatch(format!("expected {}, got {}", expected, got.type_name()))
}

impl ColumnValue for i64 {
    fn to_value(&self) -> Value {
        Value::Integer(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value.as_i64().ok_or_else(|| mismatch("INTEGER", value))
    }
}

impl ColumnValue for i32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        let raw = i64::from_value(value)?;
        i32::try_from(raw).map_err(|_| DbError::TypeMismatch(format!("{} overflows i32", raw)))
    }
}

impl ColumnValue for u32 {
    fn to_value(&self) -> Value {
        Value::Integer(i64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        let raw = i64::from_value(value)?;
        u32::try_from(raw).map_err(|_| DbError::TypeMismatch(format!("{} overflows u32", raw)))
    }
}

impl ColumnValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        value.as_f64().ok_or_else(|| mismatch("FLOAT", value))
    }
}

impl ColumnValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }

    fn from_value(value: &Value) -> Result<Self> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl ColumnValue for bool {
    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::Json(JsonValue::Bool(b)) => Ok(*b),
            other => Err(mismatch("BOOLEAN", other)),
        }
    }
}

impl ColumnValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(id) => Ok(id.to_string()),
            other => other
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| mismatch("TEXT", other)),
        }
    }
}

impl ColumnValue for Uuid {
    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(id) => Ok(*id),
            other => {
                let raw = other.as_str().ok_or_else(|| mismatch("UUID", other))?;
                Uuid::parse_str(raw).map_err(|err| DbError::TypeMismatch(err.to_string()))
            }
        }
    }
}

impl ColumnValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            other => {
                let raw = other.as_str().ok_or_else(|| mismatch("TIMESTAMP", other))?;
                DateTime::parse_from_rfc3339(raw)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|err| DbError::TypeMismatch(err.to_string()))
            }
        }
    }
}

impl ColumnValue for JsonValue {
    fn to_value(&self) -> Value {
        Value::Json(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.to_json())
    }
}

impl<T: ColumnValue> ColumnValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}

/// Composite value columns (lists) are stored as JSON arrays and compared structurally.
impl<T: ColumnValue> ColumnValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::Json(JsonValue::Array(
            self.iter().map(|item| item.to_value().to_json()).collect(),
        ))
    }

    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::Json(JsonValue::Array(items)) => items
                .iter()
                .map(|item| T::from_value(&Value::from_json(item)))
                .collect(),
            other => Err(mismatch("JSON array", other)),
        }
    }
}

/// Serializes a semi-structured field into its stored column value.
pub fn document_to_value<T: Serialize>(document: &Option<T>) -> Result<Value> {
    match document {
        Some(inner) => Ok(Value::Json(serde_json::to_value(inner)?)),
        None => Ok(Value::Null),
    }
}

/// Reads a semi-structured field back from its stored column value.
pub fn document_from_value<T: DeserializeOwned>(value: Option<&Value>) -> Result<Option<T>> {
    match value {
        None | Some(Value::Null) | Some(Value::Json(JsonValue::Null)) => Ok(None),
        Some(Value::Json(json)) => Ok(Some(serde_json::from_value(json.clone())?)),
        Some(Value::Text(raw)) => Ok(Some(serde_json::from_str(raw)?)),
        Some(other) => Err(mismatch("JSON", other)),
    }
}

/// Reads a scalar field, treating a missing column as NULL.
pub fn scalar_from_row<T: ColumnValue>(value: Option<&Value>) -> Result<T> {
    T::from_value(value.unwrap_or(&Value::Null))
}
