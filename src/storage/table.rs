use crate::core::{Column, DataType, DbError, Result, Row, Value};

/// Declared shape of a table: its columns and (optionally) its key column.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
    key_column: Option<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            key_column: None,
        }
    }

    pub fn with_key(mut self, column: impl Into<String>) -> Self {
        self.key_column = Some(column.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn key_column(&self) -> Option<&str> {
        self.key_column.as_deref()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|col| col.name == name)
    }

    pub fn column_type(&self, name: &str) -> Option<&DataType> {
        self.column(name).map(|col| &col.data_type)
    }

    /// Checks every value against its declared column. Missing nullable
    /// columns are fine; unknown columns are not.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        for (name, value) in row {
            let column = self.column(name).ok_or_else(|| {
                DbError::Store(format!("column '{}' does not exist in '{}'", name, self.name))
            })?;
            column.validate(value)?;
        }
        for column in &self.columns {
            if !column.nullable && !row.contains_key(&column.name) {
                return Err(DbError::Store(format!(
                    "column '{}' cannot be NULL",
                    column.name
                )));
            }
        }
        Ok(())
    }

    pub fn key_of(&self, row: &Row) -> Option<Value> {
        let key_column = self.key_column.as_deref()?;
        row.get(key_column).filter(|value| !value.is_null()).cloned()
    }
}

/// A pending write, kept in order inside a transaction overlay.
#[derive(Debug, Clone)]
pub enum RowWrite {
    /// Insert or replace. Rows without a key are always appended.
    Put { key: Option<Value>, row: Row },
    Delete { key: Value },
}

/// Committed rows of one table.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn position(&self, key: &Value) -> Option<usize> {
        let key_column = self.schema.key_column()?;
        self.rows
            .iter()
            .position(|row| row.get(key_column) == Some(key))
    }

    pub fn get(&self, key: &Value) -> Option<&Row> {
        self.position(key).map(|idx| &self.rows[idx])
    }

    pub fn apply(&mut self, write: &RowWrite) {
        match write {
            RowWrite::Put { key: Some(key), row } => match self.position(key) {
                Some(idx) => self.rows[idx] = row.clone(),
                None => self.rows.push(row.clone()),
            },
            RowWrite::Put { key: None, row } => self.rows.push(row.clone()),
            RowWrite::Delete { key } => {
                if let Some(idx) = self.position(key) {
                    self.rows.remove(idx);
                }
            }
        }
    }
}
