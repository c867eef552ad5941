pub mod convert;
pub mod error;
pub mod types;
pub mod value;

pub use convert::ColumnValue;
pub use error::{DbError, Result};
pub use types::{
    Column, ColumnDef, ColumnKind, DataType, DocumentSubtype, EntityId, Row, resolve_column,
};
pub use value::Value;
