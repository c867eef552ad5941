use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// A value could not be turned into a JSON document fragment.
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Schema lookup failed for '{table}.{column}': {reason}")]
    SchemaLookup {
        table: String,
        column: String,
        reason: String,
    },

    #[error("Unsupported entity '{0}': {1}")]
    UnsupportedEntity(String, String),

    #[error("Transaction {0} is {1}")]
    TransactionState(String, String),

    /// The underlying store rejected an operation. Carried through verbatim.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Entity '{0}' with id '{1}' not found")]
    NotFound(String, String),

    #[error("Invalid change set: {0}")]
    InvalidChangeSet(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// Soft errors are recovered locally and only surface through logs.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::Serialization(_) | Self::SchemaLookup { .. })
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
