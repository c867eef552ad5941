use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// A single column value as exchanged with the store.
///
/// Scalar columns map onto the first variants; semi-structured columns are
/// carried as `Json`.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Json(JsonValue),
}

impl Value {
    /// Name used in conversion errors, matching the catalog's type names.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
            Self::Uuid(_) => "UUID",
            Self::Json(_) => "JSON",
        }
    }

    /// Integral view; floats convert only when they hold a whole number in range.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
            Self::Json(JsonValue::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            Self::Json(JsonValue::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Json(JsonValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::Json(JsonValue::Null))
    }

    /// Renders the value as a JSON fragment (bind arguments, CLI output, row dumps).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Integer(i) => JsonValue::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Boolean(b) => JsonValue::Bool(*b),
            Self::Timestamp(ts) => JsonValue::String(ts.to_rfc3339()),
            Self::Uuid(id) => JsonValue::String(id.to_string()),
            Self::Json(v) => v.clone(),
        }
    }

    /// Best-effort inverse of [`Value::to_json`] for scalar JSON fragments.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Boolean(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.clone()),
        }
    }
}

impl PartialEq for Value {
    /// Integers and floats compare numerically, NaN equals NaN and timestamps
    /// compare as instants. A JSON scalar never equals its typed counterpart.
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Integer(a), Integer(b)) => a == b,
            (Float(a), Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Integer(_) | Float(_), Integer(_) | Float(_)) => self.as_f64() == other.as_f64(),
            (Text(a), Text(b)) => a == b,
            (Boolean(a), Boolean(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (Uuid(a), Uuid(b)) => a == b,
            (Json(a), Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    /// Numbers hash through their `f64` form so `Integer(2)` and `Float(2.0)`
    /// land together; zero and NaN are normalized first.
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Integer(_) | Self::Float(_) => {
                1u8.hash(state);
                let number = self.as_f64().unwrap_or_default();
                let bits = if number.is_nan() {
                    f64::NAN.to_bits()
                } else if number == 0.0 {
                    0.0f64.to_bits()
                } else {
                    number.to_bits()
                };
                bits.hash(state);
            }
            Self::Text(s) => {
                2u8.hash(state);
                s.hash(state);
            }
            Self::Boolean(b) => {
                3u8.hash(state);
                b.hash(state);
            }
            Self::Timestamp(ts) => {
                4u8.hash(state);
                ts.hash(state);
            }
            Self::Uuid(id) => {
                5u8.hash(state);
                id.hash(state);
            }
            Self::Json(v) => {
                6u8.hash(state);
                v.to_string().hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => f.write_str(s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            Self::Uuid(id) => write!(f, "{}", id),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! value_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(value: $source) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

value_from! {
    i64 => Integer,
    i32 => Integer,
    f64 => Float,
    String => Text,
    &str => Text,
    bool => Boolean,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
    JsonValue => Json,
}
