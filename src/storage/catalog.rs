use std::collections::HashMap;
use std::sync::Arc;

use super::TableSchema;
use crate::core::{DataType, DbError, Result};

/// Table schemas by name.
///
/// Immutable once built; adding a table produces a new catalog, so readers
/// can clone it cheaply and never hold a lock across a lookup.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: Arc<HashMap<String, TableSchema>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, schema: TableSchema) -> Result<Self> {
        let name = schema.name().to_string();
        if self.tables.contains_key(&name) {
            return Err(DbError::Store(format!("table '{}' already exists", name)));
        }

        let mut tables = (*self.tables).clone();
        tables.insert(name, schema);
        Ok(Self {
            tables: Arc::new(tables),
        })
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<DataType> {
        self.table(table)
            .and_then(|schema| schema.column_type(column))
            .cloned()
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DocumentSubtype};

    #[test]
    fn test_with_table_is_copy_on_write() {
        let empty = Catalog::new();
        let schema = TableSchema::new(
            "accounts",
            vec![Column::new("data", DataType::Document(DocumentSubtype::Json))],
        );
        let catalog = empty.clone().with_table(schema.clone()).unwrap();

        assert!(!empty.table_exists("accounts"));
        assert_eq!(
            catalog.column_type("accounts", "data"),
            Some(DataType::Document(DocumentSubtype::Json))
        );
        assert_eq!(catalog.column_type("accounts", "missing"), None);
        assert!(catalog.with_table(schema).is_err());
    }
}
