use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::{DataType, DocumentSubtype, Result};

/// Where column metadata comes from (a catalog query in a real database).
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Declared type of `table.column`, or `None` when the column is unknown.
    async fn column_type(&self, table: &str, column: &str) -> Result<Option<DataType>>;
}

/// Resolves and memoizes the storage subtype of document columns.
///
/// Cloning shares the cache. Entries are keyed `"table.column"` and are
/// never evicted; they are only written after a successful lookup, so a
/// transient metadata failure is retried next time.
#[derive(Clone)]
pub struct ColumnTypeResolver {
    source: Arc<dyn SchemaSource>,
    cache: Arc<RwLock<HashMap<String, DocumentSubtype>>>,
    default_subtype: DocumentSubtype,
}

impl ColumnTypeResolver {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            cache: Arc::new(RwLock::new(HashMap::new())),
            default_subtype: DocumentSubtype::default(),
        }
    }

    pub fn with_default_subtype(mut self, subtype: DocumentSubtype) -> Self {
        self.default_subtype = subtype;
        self
    }

    pub fn default_subtype(&self) -> DocumentSubtype {
        self.default_subtype
    }

    /// Subtype of `table.column`. Never fails: lookup errors and non-document
    /// columns fall back to the default subtype.
    pub async fn resolve(&self, table: &str, column: &str) -> DocumentSubtype {
        let key = cache_key(table, column);
        if let Some(subtype) = self.cached_by_key(&key) {
            return subtype;
        }

        let subtype = match self.source.column_type(table, column).await {
            Ok(Some(data_type)) => match data_type.document_subtype() {
                Some(subtype) => subtype,
                None => {
                    debug!(
                        "Column {} has type {}, using {} for document operations",
                        key, data_type, self.default_subtype
                    );
                    self.default_subtype
                }
            },
            Ok(None) => {
                debug!("Column {} not found in catalog, using {}", key, self.default_subtype);
                self.default_subtype
            }
            Err(err) => {
                warn!(
                    "Column type lookup for {} failed: {}. Falling back to {}",
                    key, err, self.default_subtype
                );
                return self.default_subtype;
            }
        };

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, subtype);
        subtype
    }

    pub fn cached(&self, table: &str, column: &str) -> Option<DocumentSubtype> {
        self.cached_by_key(&cache_key(table, column))
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn cached_by_key(&self, key: &str) -> Option<DocumentSubtype> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }
}

fn cache_key(table: &str, column: &str) -> String {
    format!("{}.{}", table, column)
}
